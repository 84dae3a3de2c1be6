//! Iterative Kademlia lookups.
//!
//! Both traversals keep a set of the k closest nodes seen so far and query
//! up to α of its unqueried members per round, merging whatever comes back.
//! `find_node` converges when a full round leaves the closest node
//! unchanged; `get_peers` stops as soon as any peer surfaces or after a
//! bounded number of rounds.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::join_all;
use tracing::{debug, info};

use super::error::DhtError;
use super::message::{DhtQuery, DhtResponse};
use super::node::{Node, NodeId};
use super::routing::K;
use super::server::DhtNode;
use crate::metainfo::InfoHash;

/// Parallelism of each lookup round.
const ALPHA: usize = 3;
/// Upper bound on get_peers rounds.
const MAX_ROUNDS: usize = 10;

impl DhtNode {
    /// Iteratively walks toward `target`, returning the final closest set.
    ///
    /// Each round queries up to α unqueried nodes from the current closest
    /// set and merges the returned nodes, keeping the k nearest by XOR
    /// distance. The walk stops when a full round leaves the nearest node
    /// unchanged, or when every member of the set has been queried.
    pub async fn find_node(self: &Arc<Self>, target: NodeId) -> Result<Vec<Node>, DhtError> {
        let mut closest = self.routing_table().closest_nodes(&target, K);
        let mut queried: HashSet<NodeId> = HashSet::new();

        loop {
            let nearest_before = closest.first().map(|n| n.id);

            let batch: Vec<Node> = closest
                .iter()
                .filter(|n| !queried.contains(&n.id))
                .take(ALPHA)
                .cloned()
                .collect();
            if batch.is_empty() {
                break;
            }

            for node in &batch {
                queried.insert(node.id);
            }

            let results = join_all(batch.iter().map(|node| {
                let node = node.clone();
                async move { (node.id, self.query(node.addr, DhtQuery::FindNode { target }).await) }
            }))
            .await;

            for (node_id, result) in results {
                match result {
                    Ok(DhtResponse::FindNode { nodes, .. })
                    | Ok(DhtResponse::GetPeers {
                        nodes: Some(nodes), ..
                    }) => {
                        for found in nodes {
                            self.routing_table().insert(found.clone());
                            closest.push(found);
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        debug!(error = %e, "find_node query failed");
                        self.routing_table().mark_failed(&node_id);
                    }
                }
            }

            prune_closest(&mut closest, &target);

            if closest.first().map(|n| n.id) == nearest_before {
                break;
            }
        }

        Ok(closest)
    }

    /// Finds peers for an info-hash.
    ///
    /// The traversal mirrors `find_node` but issues `get_peers`: `values`
    /// in a response accumulate as peers and end the walk; `nodes` keep it
    /// going, up to a bounded number of rounds.
    pub async fn lookup_peers(
        self: &Arc<Self>,
        info_hash: InfoHash,
    ) -> Result<Vec<SocketAddr>, DhtError> {
        let (peers, _) = self.lookup_peers_inner(info_hash).await;
        Ok(peers)
    }

    /// Finds peers and then announces our presence on `port` to the k
    /// closest nodes of the final set, using the tokens they handed back.
    pub async fn announce(
        self: &Arc<Self>,
        info_hash: InfoHash,
        port: u16,
    ) -> Result<Vec<SocketAddr>, DhtError> {
        let (peers, tokens) = self.lookup_peers_inner(info_hash).await;

        let announces = tokens.into_iter().take(K).map(|(node, token)| {
            let query = DhtQuery::AnnouncePeer {
                info_hash: *info_hash.as_bytes(),
                port,
                token,
                implied_port: false,
            };
            async move { self.query(node.addr, query).await }
        });

        let sent = join_all(announces)
            .await
            .into_iter()
            .filter(|r| r.is_ok())
            .count();
        debug!(%info_hash, sent, "dht announce complete");

        Ok(peers)
    }

    async fn lookup_peers_inner(
        self: &Arc<Self>,
        info_hash: InfoHash,
    ) -> (Vec<SocketAddr>, Vec<(Node, Bytes)>) {
        let target = NodeId(*info_hash.as_bytes());
        let mut closest = self.routing_table().closest_nodes(&target, K);
        let mut queried: HashSet<NodeId> = HashSet::new();
        let mut tokens: HashMap<NodeId, (Node, Bytes)> = HashMap::new();
        let mut peers: Vec<SocketAddr> = Vec::new();

        for _ in 0..MAX_ROUNDS {
            let batch: Vec<Node> = closest
                .iter()
                .filter(|n| !queried.contains(&n.id))
                .take(ALPHA)
                .cloned()
                .collect();
            if batch.is_empty() {
                break;
            }

            for node in &batch {
                queried.insert(node.id);
            }

            let results = join_all(batch.iter().map(|node| {
                let node = node.clone();
                let addr = node.addr;
                let query = DhtQuery::GetPeers {
                    info_hash: *info_hash.as_bytes(),
                };
                async move { (node, self.query(addr, query).await) }
            }))
            .await;

            for (node, result) in results {
                match result {
                    Ok(DhtResponse::GetPeers {
                        token,
                        peers: found_peers,
                        nodes,
                        ..
                    }) => {
                        if !token.is_empty() {
                            tokens.insert(node.id, (node.clone(), token));
                        }
                        if let Some(found) = found_peers {
                            peers.extend(found);
                        }
                        if let Some(nodes) = nodes {
                            for found in nodes {
                                self.routing_table().insert(found.clone());
                                closest.push(found);
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        debug!(error = %e, "get_peers query failed");
                        self.routing_table().mark_failed(&node.id);
                    }
                }
            }

            prune_closest(&mut closest, &target);

            if !peers.is_empty() {
                break;
            }
        }

        peers.sort();
        peers.dedup();
        info!(%info_hash, peers = peers.len(), queried = queried.len(), "dht peer lookup finished");

        // Closest-first token order for announcing.
        let mut ranked: Vec<(Node, Bytes)> = tokens.into_values().collect();
        ranked.sort_by(|a, b| a.0.id.distance(&target).cmp(&b.0.id.distance(&target)));

        (peers, ranked)
    }
}

// Dedupe by id and keep the k nearest to the target.
fn prune_closest(closest: &mut Vec<Node>, target: &NodeId) {
    closest.sort_by(|a, b| a.id.distance(target).cmp(&b.id.distance(target)));
    closest.dedup_by(|a, b| a.id == b.id);
    closest.truncate(K);
}
