//! `tonic`/`tower` binding for `cluster-client`: a priority-aware,
//! round-robin load-balanced [`tonic::transport::Channel`]-backed service
//! driven by a pluggable discovery source.

pub mod balancer;
pub mod channel;
pub mod error;
pub mod interceptor;
pub mod transport;

pub use balancer::{BalancerError, ClusterBalancer};
pub use channel::{ClusterChannel, ClusterChannelBuilder};
pub use error::Error;
pub use interceptor::{status_code_policy, RefreshInterceptor, RefreshPolicy};
pub use transport::TonicTransport;
