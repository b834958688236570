//! Error taxonomy for the cluster resolver core.

use std::time::Duration;

use thiserror::Error;

use crate::endpoint::Endpoint;

/// Errors raised while building or running a [`crate::resolver::ClusterResolver`].
#[derive(Debug, Error)]
pub enum Error {
    /// Raised synchronously at build time: no seeds were configured, or one of the
    /// configured seed strings could not be parsed.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Discovery failed against every seed for `resilience.max_discovery_attempts`
    /// consecutive attempts. The resolver has transitioned to `Closed`.
    #[error("bootstrap failed after {attempts} attempt(s) against {seeds} seed(s)")]
    BootstrapFailed {
        /// Number of bootstrap attempts made before giving up.
        attempts: usize,
        /// Number of distinct seeds that were tried.
        seeds: usize,
    },

    /// The load-balancer's selection set was empty at pick time.
    #[error("no reachable nodes")]
    NoReachableNodes,
}

/// A single discovery call failed. This is always handled locally (seed cooldown
/// plus retry) and is never surfaced to the caller directly; see [`Error::BootstrapFailed`]
/// for the terminal case.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The call did not complete within the configured timeout.
    #[error("discovery call to {endpoint} timed out after {timeout:?}")]
    Timeout {
        /// The seed endpoint that was used.
        endpoint: Endpoint,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// The underlying stream ended or broke before or after yielding a snapshot.
    #[error("discovery stream from {endpoint} ended: {message}")]
    StreamBroken {
        /// The seed endpoint that was used.
        endpoint: Endpoint,
        /// A human-readable description of the failure.
        message: String,
    },

    /// The seed pool could not hand out a channel (e.g. connection refused).
    #[error("transport error talking to {endpoint}: {message}")]
    Transport {
        /// The seed endpoint that was used.
        endpoint: Endpoint,
        /// A human-readable description of the failure.
        message: String,
    },

    /// The operation was cancelled by channel close or a refresh request.
    #[error("discovery cancelled")]
    Cancelled,
}

impl DiscoveryError {
    /// Whether this failure should evict the seed's channel from the pool outright,
    /// rather than merely placing it in cooldown.
    pub fn is_non_retryable(&self) -> bool {
        matches!(self, DiscoveryError::Transport { .. })
    }
}

/// Errors raised while building a resolver: missing seeds, an unparsable endpoint,
/// or a missing topology source.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// No seed endpoints were supplied; at least one is required.
    #[error("at least one seed endpoint is required")]
    NoSeeds,

    /// A seed string could not be parsed as `host:port`.
    #[error("invalid seed endpoint {raw:?}: {source}")]
    InvalidSeed {
        /// The offending input string.
        raw: String,
        /// The underlying parse failure.
        #[source]
        source: crate::endpoint::ParseError,
    },
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
