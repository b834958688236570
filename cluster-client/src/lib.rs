//! Transport-agnostic core of a client-side cluster resolver and load
//! balancer.
//!
//! This crate owns the topology model, endpoint parsing, the seed channel
//! pool, the polling-to-streaming discovery adapter, and the resolver state
//! machine that ties them together. It has no knowledge of any particular
//! RPC framework; a binding crate supplies a [`transport::Transport`]
//! implementation and a concrete [`source::StreamingSource`] or
//! [`source::PollingSource`] to wire it to a real discovery protocol.

pub mod attributes;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod node;
pub mod resolver;
pub mod runtime;
pub mod seed_pool;
pub mod source;
pub mod state;
pub mod transport;

pub use attributes::{AttributeValue, Attributes};
pub use config::{ClusterClientConfig, ResilienceOptions};
pub use endpoint::Endpoint;
pub use error::{ConfigurationError, DiscoveryError, Error, Result};
pub use node::{Diff, Node, Topology};
pub use resolver::ClusterResolver;
pub use runtime::{Runtime, TokioRuntime};
pub use seed_pool::SeedPool;
pub use source::{PollingSource, PollingToStreamingAdapter, StreamingSource};
pub use state::{ChannelState, ResolverPhase};
pub use transport::{TopologyContext, Transport};
