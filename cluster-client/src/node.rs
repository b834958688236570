//! The Node/Topology model (component A).

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};

use crate::attributes::Attributes;
use crate::endpoint::Endpoint;

/// A single cluster member as announced by a topology source.
///
/// Immutable and value-equal by `(endpoint, eligible, priority, metadata)` —
/// two nodes are the same node only if all four agree, per the "full node
/// state" interpretation of snapshot equality (see the open question in
/// `SPEC_FULL.md` §9).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Node {
    endpoint: Endpoint,
    eligible: bool,
    priority: i32,
    metadata: Attributes,
}

impl Node {
    /// Creates a node with empty metadata.
    pub fn new(endpoint: Endpoint, eligible: bool, priority: i32) -> Self {
        Self {
            endpoint,
            eligible,
            priority,
            metadata: Attributes::new(),
        }
    }

    /// Attaches a metadata bag, returning `self` for chaining.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Attributes) -> Self {
        self.metadata = metadata;
        self
    }

    /// The node's address.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Whether the node currently accepts traffic.
    pub fn eligible(&self) -> bool {
        self.eligible
    }

    /// The node's priority. Lower values are preferred; the load balancer
    /// only ever selects among nodes at the lowest priority with at least
    /// one eligible member (see [`crate::node::Topology`]).
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// The node's metadata bag.
    pub fn metadata(&self) -> &Attributes {
        &self.metadata
    }
}

fn hash_one(node: &Node) -> u64 {
    let mut hasher = DefaultHasher::new();
    node.hash(&mut hasher);
    hasher.finish()
}

/// Order-independent combination of per-node hashes plus the element count,
/// so that two topologies with the same *set* of nodes hash identically
/// regardless of the order their source announced them in.
fn combine(nodes: &[Node]) -> u64 {
    let sum = nodes
        .iter()
        .map(hash_one)
        .fold(0u64, |acc, h| acc.wrapping_add(h));
    sum.wrapping_add(nodes.len() as u64)
}

/// An immutable snapshot of cluster membership.
///
/// Two topologies are equivalent iff they contain the same *set* of nodes;
/// the announced order is retained only for diagnostics (see `nodes()`).
/// Duplicate nodes (by full value) are collapsed at construction time so
/// that `count()`/`eligible_count()` reflect the de-duplicated set.
#[derive(Debug, Clone)]
pub struct Topology {
    nodes: Vec<Node>,
    hash: u64,
    eligible_count: usize,
}

impl Topology {
    /// Builds a topology from an ordered sequence of nodes, de-duplicating
    /// by full node value while preserving first-seen order.
    pub fn new(nodes: impl IntoIterator<Item = Node>) -> Self {
        let mut seen = HashSet::new();
        let mut unique = Vec::new();
        for node in nodes {
            if seen.insert(node.clone()) {
                unique.push(node);
            }
        }
        let eligible_count = unique.iter().filter(|n| n.eligible).count();
        let hash = combine(&unique);
        Self {
            nodes: unique,
            hash,
            eligible_count,
        }
    }

    /// The distinct, stable empty topology.
    pub fn empty() -> Self {
        Self {
            nodes: Vec::new(),
            hash: combine(&[]),
            eligible_count: 0,
        }
    }

    /// Whether this is the empty topology.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Total node count (after de-duplication).
    pub fn count(&self) -> usize {
        self.nodes.len()
    }

    /// Count of nodes with `eligible == true`.
    pub fn eligible_count(&self) -> usize {
        self.eligible_count
    }

    /// Nodes in source-announced order, for diagnostics. Do not rely on this
    /// order for equality or selection; use [`Topology::equals`] and the load
    /// balancer's selection set instead.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Order-independent hash of the node set. Equal topologies always
    /// produce equal hashes; the converse is not guaranteed (use
    /// [`Topology::equals`] for a definitive comparison).
    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// Set-equality comparison: true iff both topologies contain exactly the
    /// same nodes, irrespective of order.
    pub fn equals(&self, other: &Topology) -> bool {
        if self.hash != other.hash || self.nodes.len() != other.nodes.len() {
            return false;
        }
        let ours: HashSet<&Node> = self.nodes.iter().collect();
        other.nodes.iter().all(|n| ours.contains(n))
    }

    /// Computes the `(added, removed)` diff of `self` against `other`:
    /// nodes present in `other` but not `self`, and nodes present in `self`
    /// but not `other`.
    pub fn diff(&self, other: &Topology) -> Diff {
        let ours: HashSet<&Node> = self.nodes.iter().collect();
        let theirs: HashSet<&Node> = other.nodes.iter().collect();
        Diff {
            added: theirs.difference(&ours).count(),
            removed: ours.difference(&theirs).count(),
        }
    }
}

impl PartialEq for Topology {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

impl Eq for Topology {}

/// The result of comparing two topologies: how many nodes were gained and
/// lost going from the first to the second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Diff {
    /// Nodes present in the new topology but not the old one.
    pub added: usize,
    /// Nodes present in the old topology but not the new one.
    pub removed: usize,
}

impl Diff {
    /// Whether the two topologies compared equivalent.
    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.removed == 0
    }
}
