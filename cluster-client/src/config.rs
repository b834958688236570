//! Caller-facing configuration (§6.1) and the resolver's backoff policy.

use std::time::Duration;

use crate::error::ConfigurationError;

/// Resilience knobs controlling discovery timeouts, bootstrap attempts, and
/// backoff (§6.1).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub struct ResilienceOptions {
    /// Per-discovery-call timeout.
    pub timeout: Duration,
    /// Bootstrap attempts before surfacing `BootstrapFailed`.
    pub max_discovery_attempts: usize,
    /// First backoff after total seed failure.
    pub initial_backoff: Duration,
    /// Backoff cap.
    pub max_backoff: Duration,
    /// gRPC status codes (as their numeric value) that trigger a refresh.
    pub refresh_on_status_codes: Vec<i32>,
}

impl Default for ResilienceOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_discovery_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            // 14 = UNAVAILABLE in the standard gRPC status code space.
            refresh_on_status_codes: vec![14],
        }
    }
}

impl ResilienceOptions {
    /// The backoff policy derived from `initial_backoff`/`max_backoff`, with
    /// a fixed 2x multiplier (per the bootstrap algorithm in §4.E).
    pub(crate) fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            initial_backoff: self.initial_backoff,
            max_backoff: self.max_backoff,
            backoff_multiplier: 2.0,
        }
    }
}

/// Top-level configuration for a [`crate::resolver::ClusterResolver`] and its
/// seed pool.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub struct ClusterClientConfig {
    /// Ordered bootstrap endpoints, `host:port`.
    pub seeds: Vec<String>,
    /// Poll interval used when the topology source is a polling source.
    pub delay: Duration,
    /// Resilience/backoff knobs.
    pub resilience: ResilienceOptions,
    /// Soft cap on the number of live seed channels the pool retains.
    pub seed_pool_capacity: usize,
    /// Whether to apply TLS to seed channels.
    pub use_tls: bool,
}

impl Default for ClusterClientConfig {
    fn default() -> Self {
        Self {
            seeds: Vec::new(),
            delay: Duration::from_secs(30),
            resilience: ResilienceOptions::default(),
            seed_pool_capacity: 8,
            use_tls: false,
        }
    }
}

impl ClusterClientConfig {
    /// Creates a configuration from a primary endpoint plus any additional
    /// explicit seeds, deduplicating by `(host, port)` and keeping the
    /// primary in position 0 (§6.3, §9 open question).
    pub fn for_address(primary: impl Into<String>, extra_seeds: impl IntoIterator<Item = String>) -> Self {
        let mut seeds = dedupe_seeds_keep_first(
            std::iter::once(primary.into()).chain(extra_seeds),
        );
        if seeds.is_empty() {
            seeds.push(String::new());
        }
        Self {
            seeds,
            ..Self::default()
        }
    }

    /// Validates the configuration, returning the parsed seed endpoints.
    pub(crate) fn validate(&self) -> Result<Vec<crate::endpoint::Endpoint>, ConfigurationError> {
        if self.seeds.is_empty() {
            return Err(ConfigurationError::NoSeeds);
        }
        self.seeds
            .iter()
            .map(|raw| {
                crate::endpoint::Endpoint::parse(raw).map_err(|source| {
                    ConfigurationError::InvalidSeed {
                        raw: raw.clone(),
                        source,
                    }
                })
            })
            .collect()
    }
}

/// Deduplicates seed strings by their parsed `(host, port)` when parseable
/// (falling back to the raw string otherwise), keeping the first occurrence
/// of each and thus preserving the caller's primary-first ordering.
fn dedupe_seeds_keep_first(seeds: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for seed in seeds {
        let key = crate::endpoint::Endpoint::parse(&seed)
            .map(|ep| ep.to_string())
            .unwrap_or_else(|_| seed.clone());
        if seen.insert(key) {
            out.push(seed);
        }
    }
    out
}

/// Exponential backoff policy: `initial_backoff * multiplier^attempt`, capped
/// at `max_backoff`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct RetryPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    fn backoff_duration(&self, attempt: u32) -> Duration {
        let multiplier = self.backoff_multiplier.powi(attempt as i32);
        let backoff = self.initial_backoff.mul_f64(multiplier);
        backoff.min(self.max_backoff)
    }
}

/// Stateful backoff calculator, with ±20% jitter applied to each returned
/// duration to avoid many channels sharing a seed set reconnecting in
/// lockstep.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    policy: RetryPolicy,
    attempt: u32,
}

impl Backoff {
    pub(crate) fn new(policy: RetryPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Returns the next backoff duration and advances the attempt counter.
    pub(crate) fn next_backoff(&mut self) -> Duration {
        let base = self.policy.backoff_duration(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        jitter(base)
    }

    /// Resets the attempt counter after a success.
    pub(crate) fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Applies +/-20% jitter to a duration.
fn jitter(base: Duration) -> Duration {
    let factor = 0.8 + fastrand::f64() * 0.4;
    base.mul_f64(factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_up_to_cap() {
        let policy = RetryPolicy {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        };
        assert_eq!(policy.backoff_duration(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_duration(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_duration(2), Duration::from_millis(400));
        // 100ms * 2^10 = 102.4s, capped at 5s.
        assert_eq!(policy.backoff_duration(10), Duration::from_secs(5));
    }

    #[test]
    fn jittered_backoff_stays_within_twenty_percent() {
        let policy = RetryPolicy {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        };
        let mut backoff = Backoff::new(policy);
        for _ in 0..50 {
            let d = backoff.next_backoff();
            assert!(d >= Duration::from_millis(80) && d <= Duration::from_millis(500));
        }
    }

    #[test]
    fn reset_restarts_from_initial_backoff() {
        let policy = RetryPolicy {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        };
        let mut backoff = Backoff::new(policy);
        backoff.next_backoff();
        backoff.next_backoff();
        backoff.reset();
        let d = backoff.next_backoff();
        assert!(d >= Duration::from_millis(80) && d <= Duration::from_millis(120));
    }

    #[test]
    fn for_address_dedupes_and_keeps_primary_first() {
        let cfg = ClusterClientConfig::for_address(
            "10.0.0.1:9000",
            vec!["10.0.0.2:9000".to_string(), "10.0.0.1:9000".to_string()],
        );
        assert_eq!(
            cfg.seeds,
            vec!["10.0.0.1:9000".to_string(), "10.0.0.2:9000".to_string()]
        );
    }

    #[test]
    fn validate_rejects_empty_seeds() {
        let cfg = ClusterClientConfig::default();
        assert_eq!(cfg.validate().unwrap_err(), ConfigurationError::NoSeeds);
    }

    #[test]
    fn validate_rejects_malformed_seed() {
        let cfg = ClusterClientConfig {
            seeds: vec!["not-an-endpoint".to_string()],
            ..ClusterClientConfig::default()
        };
        assert!(matches!(
            cfg.validate().unwrap_err(),
            ConfigurationError::InvalidSeed { .. }
        ));
    }
}
