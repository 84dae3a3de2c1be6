use std::net::SocketAddr;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::metainfo::InfoHash;

/// How long an announced peer stays listed.
pub const PEER_TTL: Duration = Duration::from_secs(30 * 60);
/// Most peers kept per info-hash; newest win.
pub const MAX_PEERS_PER_KEY: usize = 100;

#[derive(Debug, Clone)]
struct AnnouncedPeer {
    addr: SocketAddr,
    added_at: Instant,
}

/// Transient storage for `announce_peer` data: info-hash → announced
/// peers, with per-key caps and 30-minute expiry.
///
/// Entries expire lazily on access; nothing is persisted.
#[derive(Debug, Default)]
pub struct PeerStore {
    peers: DashMap<InfoHash, Vec<AnnouncedPeer>>,
}

impl PeerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an announced peer, replacing an older entry for the same
    /// address and evicting the oldest entry when the key is at capacity.
    pub fn add_peer(&self, info_hash: InfoHash, addr: SocketAddr) {
        let now = Instant::now();
        let mut entry = self.peers.entry(info_hash).or_default();

        entry.retain(|p| now.duration_since(p.added_at) < PEER_TTL && p.addr != addr);

        if entry.len() >= MAX_PEERS_PER_KEY {
            // Oldest first in insertion order.
            entry.remove(0);
        }

        entry.push(AnnouncedPeer {
            addr,
            added_at: now,
        });
    }

    /// The live peers announced under `info_hash`.
    pub fn peers_for(&self, info_hash: &InfoHash) -> Vec<SocketAddr> {
        let now = Instant::now();
        let Some(mut entry) = self.peers.get_mut(info_hash) else {
            return Vec::new();
        };

        entry.retain(|p| now.duration_since(p.added_at) < PEER_TTL);
        entry.iter().map(|p| p.addr).collect()
    }

    /// Number of keys with at least one stored peer.
    pub fn key_count(&self) -> usize {
        self.peers.len()
    }
}
