//! Read-only diagnostic snapshot of a resolver's current state (§9.2).

use std::sync::Arc;

use arc_swap::ArcSwap;

/// The resolver's coarse lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverPhase {
    /// Racing seeds for an initial topology; no topology has been published
    /// yet.
    Bootstrap,
    /// Holding (or re-establishing) a live subscription; at least one
    /// topology has been published.
    Subscribed,
    /// Every seed failed; waiting out a backoff window before retrying.
    Backoff,
    /// [`crate::resolver::ClusterResolver::close`] was called; no further
    /// discovery will occur.
    Closed,
}

/// A point-in-time snapshot of resolver health, safe to read from any
/// thread without blocking the discovery loop.
#[derive(Debug, Clone)]
pub struct ChannelState {
    phase: ResolverPhase,
    node_count: usize,
    eligible_count: usize,
    last_error: Option<String>,
}

impl ChannelState {
    fn new(phase: ResolverPhase, node_count: usize, eligible_count: usize, last_error: Option<String>) -> Self {
        Self {
            phase,
            node_count,
            eligible_count,
            last_error,
        }
    }

    /// The resolver's current phase.
    pub fn phase(&self) -> ResolverPhase {
        self.phase
    }

    /// Total node count in the last published topology.
    pub fn node_count(&self) -> usize {
        self.node_count
    }

    /// Eligible node count in the last published topology.
    pub fn eligible_count(&self) -> usize {
        self.eligible_count
    }

    /// The most recent discovery failure's description, if any occurred
    /// since the last successful publish.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

/// Lock-free holder for the current [`ChannelState`], swapped atomically by
/// the resolver's discovery loop.
#[derive(Debug)]
pub(crate) struct StateCell(ArcSwap<ChannelState>);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(ArcSwap::from_pointee(ChannelState::new(
            ResolverPhase::Bootstrap,
            0,
            0,
            None,
        )))
    }

    pub(crate) fn load(&self) -> Arc<ChannelState> {
        self.0.load_full()
    }

    pub(crate) fn set_phase(&self, phase: ResolverPhase) {
        let current = self.0.load();
        self.0.store(Arc::new(ChannelState::new(
            phase,
            current.node_count,
            current.eligible_count,
            current.last_error.clone(),
        )));
    }

    pub(crate) fn publish_topology(&self, phase: ResolverPhase, node_count: usize, eligible_count: usize) {
        self.0.store(Arc::new(ChannelState::new(phase, node_count, eligible_count, None)));
    }

    pub(crate) fn record_error(&self, phase: ResolverPhase, message: String) {
        let current = self.0.load();
        self.0.store(Arc::new(ChannelState::new(
            phase,
            current.node_count,
            current.eligible_count,
            Some(message),
        )));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_in_bootstrap_with_no_topology() {
        let cell = StateCell::new();
        let snapshot = cell.load();
        assert_eq!(snapshot.phase(), ResolverPhase::Bootstrap);
        assert_eq!(snapshot.node_count(), 0);
        assert!(snapshot.last_error().is_none());
    }

    #[test]
    fn publish_clears_previous_error() {
        let cell = StateCell::new();
        cell.record_error(ResolverPhase::Backoff, "boom".to_string());
        assert_eq!(cell.load().last_error(), Some("boom"));
        cell.publish_topology(ResolverPhase::Subscribed, 3, 2);
        let snapshot = cell.load();
        assert!(snapshot.last_error().is_none());
        assert_eq!(snapshot.node_count(), 3);
        assert_eq!(snapshot.eligible_count(), 2);
    }

    #[test]
    fn set_phase_preserves_topology_counts() {
        let cell = StateCell::new();
        cell.publish_topology(ResolverPhase::Subscribed, 3, 2);
        cell.set_phase(ResolverPhase::Backoff);
        let snapshot = cell.load();
        assert_eq!(snapshot.phase(), ResolverPhase::Backoff);
        assert_eq!(snapshot.node_count(), 3);
    }
}
