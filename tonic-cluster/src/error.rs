//! Error type surfaced by channel assembly and dispatched calls.

use thiserror::Error;

/// Errors raised while building or calling through a [`crate::channel::ClusterChannel`].
#[derive(Debug, Error)]
pub enum Error {
    /// Failed during resolver construction or bootstrap.
    #[error(transparent)]
    Resolver(#[from] cluster_client::Error),

    /// The balancer could not route the call.
    #[error(transparent)]
    Balancer(#[from] crate::balancer::BalancerError),
}
