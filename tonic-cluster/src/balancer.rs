//! The priority + round-robin load-balancer policy (component F).

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use arc_swap::ArcSwap;
use cluster_client::{Endpoint, Topology, Transport};
use thiserror::Error;
use tonic::body::Body;
use tonic::transport::Channel;
use tower_service::Service;

use crate::transport::TonicTransport;

/// A node admitted to the current selection set, with its already-dialed
/// (lazily-connecting) channel attached.
#[derive(Clone)]
struct SelectableNode {
    endpoint: Endpoint,
    channel: Channel,
}

/// Errors produced by [`ClusterBalancer`] itself, as opposed to errors
/// surfaced by the underlying RPC transport.
#[derive(Debug, Error)]
pub enum BalancerError {
    /// The selection set was empty at pick time.
    #[error("no reachable nodes")]
    NoReachableNodes,
    /// The picked channel failed the call.
    #[error(transparent)]
    Transport(#[from] tonic::transport::Error),
}

/// Shared handle used by [`crate::channel::ClusterChannel`] to push topology
/// updates into the balancer.
#[derive(Clone)]
pub(crate) struct BalancerHandle {
    selection: Arc<ArcSwap<Vec<SelectableNode>>>,
    transport: TonicTransport,
}

impl BalancerHandle {
    /// Recomputes the selection set (eligible nodes at the minimum priority
    /// present) from `topology` and swaps it in atomically. Nodes are
    /// connected lazily, so this never blocks on the network.
    pub(crate) async fn update(&self, topology: &Topology) {
        let min_priority = topology
            .nodes()
            .iter()
            .filter(|n| n.eligible())
            .map(|n| n.priority())
            .min();

        let Some(min_priority) = min_priority else {
            self.selection.store(Arc::new(Vec::new()));
            return;
        };

        let mut nodes = Vec::new();
        for node in topology.nodes() {
            if node.eligible() && node.priority() == min_priority {
                if let Ok(channel) = self.transport.connect(node.endpoint()).await {
                    nodes.push(SelectableNode {
                        endpoint: node.endpoint().clone(),
                        channel,
                    });
                }
            }
        }
        self.selection.store(Arc::new(nodes));
    }
}

/// Round-robins calls across the current selection set. When the set is
/// empty, fails fast with [`BalancerError::NoReachableNodes`] rather than
/// blocking, matching the "no reachable nodes" boundary behavior.
///
/// The round-robin counter is never reset on topology change, so churn does
/// not starve nodes that were recently appended to the selection set.
#[derive(Clone)]
pub struct ClusterBalancer {
    selection: Arc<ArcSwap<Vec<SelectableNode>>>,
    counter: Arc<AtomicUsize>,
}

impl ClusterBalancer {
    pub(crate) fn new(transport: TonicTransport) -> (Self, BalancerHandle) {
        let selection = Arc::new(ArcSwap::from_pointee(Vec::new()));
        let balancer = Self {
            selection: selection.clone(),
            counter: Arc::new(AtomicUsize::new(0)),
        };
        let handle = BalancerHandle { selection, transport };
        (balancer, handle)
    }

    /// The endpoints currently in the selection set, for diagnostics.
    pub fn selection_set(&self) -> Vec<Endpoint> {
        self.selection.load().iter().map(|n| n.endpoint.clone()).collect()
    }

    fn pick(&self) -> Result<Channel, BalancerError> {
        self.pick_indexed().map(|(_, channel)| channel)
    }

    fn pick_indexed(&self) -> Result<(usize, Channel), BalancerError> {
        let selection = self.selection.load();
        if selection.is_empty() {
            return Err(BalancerError::NoReachableNodes);
        }
        let idx = self.counter.fetch_add(1, Ordering::Relaxed) % selection.len();
        Ok((idx, selection[idx].channel.clone()))
    }
}

impl Service<http::Request<Body>> for ClusterBalancer {
    type Response = http::Response<Body>;
    type Error = BalancerError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: http::Request<Body>) -> Self::Future {
        match self.pick() {
            Ok(mut channel) => Box::pin(async move { Ok(channel.call(request).await?) }),
            Err(error) => Box::pin(async move { Err(error) }),
        }
    }
}

#[cfg(test)]
mod tests {
    use cluster_client::Node;

    use super::*;

    fn node(host: &str, eligible: bool, priority: i32) -> Node {
        Node::new(Endpoint::new(host, 9000), eligible, priority)
    }

    #[tokio::test]
    async fn selection_set_picks_min_priority_eligible_nodes() {
        let (balancer, handle) = ClusterBalancer::new(TonicTransport::new());
        let topology = Topology::new(vec![
            node("x", true, 0),
            node("y", true, 1),
            node("z", false, 0),
        ]);
        handle.update(&topology).await;
        assert_eq!(balancer.selection_set(), vec![Endpoint::new("x", 9000)]);
    }

    #[tokio::test]
    async fn empty_selection_set_fails_fast() {
        let (mut balancer, handle) = ClusterBalancer::new(TonicTransport::new());
        handle.update(&Topology::empty()).await;
        let request = http::Request::new(Body::empty());
        let result = balancer.call(request).await;
        assert!(matches!(result, Err(BalancerError::NoReachableNodes)));
    }

    #[tokio::test]
    async fn round_robin_visits_every_member_in_a_full_cycle() {
        let (balancer, handle) = ClusterBalancer::new(TonicTransport::new());
        let topology = Topology::new(vec![node("a", true, 0), node("b", true, 0), node("c", true, 0)]);
        handle.update(&topology).await;

        let mut seen = std::collections::HashSet::new();
        for _ in 0..3 {
            let (idx, _channel) = balancer.pick_indexed().unwrap();
            seen.insert(idx);
        }
        assert_eq!(seen.len(), 3);
    }

    #[tokio::test]
    async fn counter_does_not_reset_on_topology_change() {
        let (balancer, handle) = ClusterBalancer::new(TonicTransport::new());
        handle.update(&Topology::new(vec![node("a", true, 0)])).await;
        balancer.pick().unwrap();
        balancer.pick().unwrap();
        let before = balancer.counter.load(Ordering::Relaxed);
        handle.update(&Topology::new(vec![node("a", true, 0), node("b", true, 0)])).await;
        assert_eq!(balancer.counter.load(Ordering::Relaxed), before);
    }
}
