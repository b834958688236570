//! Abstraction over how a seed endpoint becomes a usable channel.
//!
//! This mirrors splitting a generic client core from its concrete transport
//! binding: the resolver and seed pool only depend on this trait, and a
//! transport binding crate (e.g. one built on `tonic::transport::Channel`)
//! implements it.

use std::future::Future;

use crate::endpoint::Endpoint;
use crate::error::DiscoveryError;

/// Connects to seed endpoints, producing a cloneable channel handle that the
/// topology source can issue discovery calls over.
pub trait Transport: Send + Sync + 'static {
    /// A cloneable handle to a connection. Cheap to clone (e.g. an `Arc` or a
    /// `tonic::transport::Channel`, which is itself cheaply cloneable).
    type Channel: Clone + Send + Sync + 'static;

    /// Connects to `endpoint`, returning a channel handle.
    ///
    /// Implementations may connect lazily (deferring the actual TCP/TLS
    /// handshake until first use) as long as failures surface on first use
    /// through [`DiscoveryError::Transport`].
    fn connect(
        &self,
        endpoint: &Endpoint,
    ) -> impl Future<Output = Result<Self::Channel, DiscoveryError>> + Send;
}

/// The context handed to a topology source for a single discovery call or
/// subscription (§6.2).
#[derive(Debug, Clone)]
pub struct TopologyContext<C> {
    channel: C,
    endpoint: Endpoint,
    timeout: std::time::Duration,
    cancellation: tokio_util::sync::CancellationToken,
}

impl<C> TopologyContext<C> {
    /// Builds a new context.
    pub fn new(
        channel: C,
        endpoint: Endpoint,
        timeout: std::time::Duration,
        cancellation: tokio_util::sync::CancellationToken,
    ) -> Self {
        Self {
            channel,
            endpoint,
            timeout,
            cancellation,
        }
    }

    /// The connected channel to use for discovery calls.
    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// The seed endpoint this channel was acquired from.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// The per-call timeout the source must honor.
    pub fn timeout(&self) -> std::time::Duration {
        self.timeout
    }

    /// The cancellation token the source must honor; subscriptions must end
    /// (and polls must abort) once this is cancelled.
    pub fn cancellation(&self) -> &tokio_util::sync::CancellationToken {
        &self.cancellation
    }
}
