use std::time::Duration;

use parking_lot::RwLock;

use super::node::{Node, NodeId};

/// Nodes kept per bucket.
pub const K: usize = 8;
const NUM_BUCKETS: usize = 160;

/// Whether an insert took effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The node was appended, or was already present and got refreshed.
    Accepted,
    /// The bucket is full; the node was not stored.
    Rejected,
}

#[derive(Debug, Default)]
struct Bucket {
    nodes: Vec<Node>,
}

impl Bucket {
    fn insert(&mut self, node: Node) -> InsertOutcome {
        if let Some(existing) = self.nodes.iter_mut().find(|n| n.id == node.id) {
            existing.touch();
            return InsertOutcome::Accepted;
        }

        if self.nodes.len() < K {
            self.nodes.push(node);
            return InsertOutcome::Accepted;
        }

        InsertOutcome::Rejected
    }
}

/// The Kademlia routing table: 160 k-buckets keyed by the bucket index of
/// the XOR distance from our own id.
///
/// Within a bucket, ids are distinct; inserting a known id refreshes its
/// last-seen time. A full bucket rejects new nodes (no splitting).
pub struct RoutingTable {
    own_id: NodeId,
    buckets: Vec<RwLock<Bucket>>,
}

impl RoutingTable {
    pub fn new(own_id: NodeId) -> Self {
        let buckets = (0..NUM_BUCKETS)
            .map(|_| RwLock::new(Bucket::default()))
            .collect();

        Self { own_id, buckets }
    }

    pub fn own_id(&self) -> &NodeId {
        &self.own_id
    }

    /// Inserts or refreshes a node. Our own id is never stored.
    pub fn insert(&self, node: Node) -> InsertOutcome {
        if node.id == self.own_id {
            return InsertOutcome::Rejected;
        }

        let index = self.own_id.bucket_index(&node.id).min(NUM_BUCKETS - 1);
        self.buckets[index].write().insert(node)
    }

    pub fn remove(&self, id: &NodeId) {
        let index = self.own_id.bucket_index(id).min(NUM_BUCKETS - 1);
        self.buckets[index]
            .write()
            .nodes
            .retain(|n| &n.id != id);
    }

    /// Counts a failed query against the node, evicting it once it turns
    /// bad.
    pub fn mark_failed(&self, id: &NodeId) {
        let index = self.own_id.bucket_index(id).min(NUM_BUCKETS - 1);
        let mut bucket = self.buckets[index].write();

        if let Some(node) = bucket.nodes.iter_mut().find(|n| &n.id == id) {
            node.fail();
            if node.is_bad() {
                bucket.nodes.retain(|n| &n.id != id);
            }
        }
    }

    /// The `count` good nodes closest to `target`, sorted by XOR distance
    /// ascending.
    ///
    /// Nodes that have gone quiet or have unanswered queries stay in
    /// their bucket but are not offered to lookups or inbound queries.
    pub fn closest_nodes(&self, target: &NodeId, count: usize) -> Vec<Node> {
        let mut nodes: Vec<(Node, [u8; 20])> = Vec::new();

        for bucket in &self.buckets {
            for node in bucket.read().nodes.iter().filter(|n| n.is_good()) {
                nodes.push((node.clone(), node.id.distance(target)));
            }
        }

        nodes.sort_by(|a, b| a.1.cmp(&b.1));
        nodes.truncate(count);
        nodes.into_iter().map(|(n, _)| n).collect()
    }

    pub fn node_count(&self) -> usize {
        self.buckets.iter().map(|b| b.read().nodes.len()).sum()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        let index = self.own_id.bucket_index(id).min(NUM_BUCKETS - 1);
        self.buckets[index]
            .read()
            .nodes
            .iter()
            .any(|n| &n.id == id)
    }

    /// Drops every node whose last-seen time is older than `max_age`.
    /// `max_age` of zero empties the table.
    pub fn remove_stale_nodes(&self, max_age: Duration) {
        for bucket in &self.buckets {
            bucket
                .write()
                .nodes
                .retain(|n| n.last_seen.elapsed() < max_age);
        }
    }

    /// Indices of non-empty buckets with no good node left; candidates
    /// for a refresh lookup on an id in the bucket's range.
    pub fn stale_buckets(&self) -> Vec<usize> {
        let mut stale = Vec::new();

        for (i, bucket) in self.buckets.iter().enumerate() {
            let bucket = bucket.read();
            if !bucket.nodes.is_empty() && !bucket.nodes.iter().any(|n| n.is_good()) {
                stale.push(i);
            }
        }

        stale
    }
}
