//! The seed channel pool (component C): round-robins over configured seed
//! endpoints, lazily connects and caches channels, and places seeds that
//! fail into a cooldown window before they are tried again.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::RetryPolicy;
use crate::endpoint::Endpoint;
use crate::error::DiscoveryError;
use crate::runtime::Runtime;
use crate::transport::Transport;

struct SeedState<C> {
    channel: Option<C>,
    failures: u32,
    cooldown_until: Option<Instant>,
    last_used: Instant,
}

impl<C> SeedState<C> {
    fn fresh(now: Instant) -> Self {
        Self {
            channel: None,
            failures: 0,
            cooldown_until: None,
            last_used: now,
        }
    }

    fn is_in_cooldown(&self, now: Instant) -> bool {
        self.cooldown_until.is_some_and(|until| now < until)
    }
}

/// Round-robin pool of seed channels, shared by the resolver's discovery
/// loop across bootstrap attempts and reconnects.
pub struct SeedPool<T: Transport, R: Runtime> {
    transport: T,
    seeds: Vec<Endpoint>,
    capacity: usize,
    cooldown_policy: RetryPolicy,
    states: Mutex<HashMap<Endpoint, SeedState<T::Channel>>>,
    cursor: AtomicUsize,
    closed: CancellationToken,
    runtime: R,
}

impl<T: Transport, R: Runtime> SeedPool<T, R> {
    /// Builds a pool over `seeds`, keeping at most `capacity` live channels
    /// cached at a time (soft cap: least-recently-used channels are dropped,
    /// not reconnected, so a seed can always be retried).
    pub fn new(transport: T, seeds: Vec<Endpoint>, capacity: usize, cooldown_policy: RetryPolicy, runtime: R) -> Self {
        Self {
            transport,
            seeds,
            capacity: capacity.max(1),
            cooldown_policy,
            states: Mutex::new(HashMap::new()),
            cursor: AtomicUsize::new(0),
            closed: CancellationToken::new(),
            runtime,
        }
    }

    /// The configured seed endpoints, in caller-supplied order.
    pub fn seeds(&self) -> &[Endpoint] {
        &self.seeds
    }

    /// Acquires a channel to the next live seed in round-robin order,
    /// connecting lazily if needed. If every seed is currently in cooldown,
    /// waits until the earliest cooldown expires (cancellable via
    /// `cancellation` or pool [`SeedPool::close`]).
    pub async fn acquire(
        &self,
        cancellation: &CancellationToken,
    ) -> Result<(Endpoint, T::Channel), DiscoveryError> {
        loop {
            if self.closed.is_cancelled() || cancellation.is_cancelled() {
                return Err(DiscoveryError::Cancelled);
            }
            match self.try_acquire_once().await {
                Some(acquired) => return Ok(acquired),
                None => {
                    let wait = self.earliest_cooldown_expiry().unwrap_or_else(|| Instant::now() + Duration::from_millis(50));
                    let duration = wait.saturating_duration_since(Instant::now());
                    tokio::select! {
                        biased;
                        _ = self.closed.cancelled() => return Err(DiscoveryError::Cancelled),
                        _ = cancellation.cancelled() => return Err(DiscoveryError::Cancelled),
                        _ = self.runtime.sleep(duration) => {}
                    }
                }
            }
        }
    }

    async fn try_acquire_once(&self) -> Option<(Endpoint, T::Channel)> {
        let now = Instant::now();
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % self.seeds.len().max(1);
        for offset in 0..self.seeds.len() {
            let idx = (start + offset) % self.seeds.len();
            let endpoint = self.seeds[idx].clone();

            let cached = {
                let mut states = self.states.lock().unwrap();
                let state = states.entry(endpoint.clone()).or_insert_with(|| SeedState::fresh(now));
                if state.is_in_cooldown(now) {
                    continue;
                }
                state.last_used = now;
                state.channel.clone()
            };

            let channel = match cached {
                Some(channel) => channel,
                None => match self.transport.connect(&endpoint).await {
                    Ok(channel) => {
                        self.cache_channel(endpoint.clone(), channel.clone(), now);
                        channel
                    }
                    Err(error) => {
                        self.report_failure(&endpoint, &error);
                        continue;
                    }
                },
            };
            return Some((endpoint, channel));
        }
        None
    }

    fn cache_channel(&self, endpoint: Endpoint, channel: T::Channel, now: Instant) {
        let mut states = self.states.lock().unwrap();
        if let Some(state) = states.get_mut(&endpoint) {
            state.channel = Some(channel);
            state.last_used = now;
        }
        if states.len() > self.capacity {
            let evict = states
                .iter()
                .filter(|(_, s)| s.channel.is_some())
                .min_by_key(|(_, s)| s.last_used)
                .map(|(ep, _)| ep.clone());
            if let Some(evict) = evict {
                if let Some(state) = states.get_mut(&evict) {
                    state.channel = None;
                }
            }
        }
    }

    fn earliest_cooldown_expiry(&self) -> Option<Instant> {
        self.states.lock().unwrap().values().filter_map(|s| s.cooldown_until).min()
    }

    /// Records a failed discovery call against `endpoint`: places it in
    /// cooldown (`initial_backoff * 2^failures`, capped at `max_backoff`),
    /// and evicts its cached channel outright if the failure was a hard
    /// transport error rather than a timeout or stream break.
    pub fn report_failure(&self, endpoint: &Endpoint, error: &DiscoveryError) {
        let now = Instant::now();
        let mut states = self.states.lock().unwrap();
        let state = states.entry(endpoint.clone()).or_insert_with(|| SeedState::fresh(now));
        let backoff = self
            .cooldown_policy
            .initial_backoff
            .mul_f64(2f64.powi(state.failures as i32))
            .min(self.cooldown_policy.max_backoff);
        state.failures = state.failures.saturating_add(1);
        state.cooldown_until = Some(now + backoff);
        if error.is_non_retryable() {
            state.channel = None;
        }
    }

    /// Clears cooldown bookkeeping for `endpoint` after a successful call.
    pub fn report_success(&self, endpoint: &Endpoint) {
        let mut states = self.states.lock().unwrap();
        if let Some(state) = states.get_mut(endpoint) {
            state.failures = 0;
            state.cooldown_until = None;
        }
    }

    /// Unblocks any in-progress [`SeedPool::acquire`] calls and marks the
    /// pool as closed; subsequent acquires fail immediately.
    pub fn close(&self) {
        self.closed.cancel();
    }
}
