//! Tunables the embedding application chooses.
//!
//! Protocol-mandated values (block size, handshake layout, message ids)
//! are constants in their own modules; everything here is a knob with a
//! sensible default.

use std::time::Duration;

/// Per-torrent tuning.
#[derive(Debug, Clone)]
pub struct TorrentConfig {
    /// Maximum peer connections for this torrent.
    pub max_peers: usize,
    /// Port reported to trackers for inbound connections.
    pub listen_port: u16,
    /// How long a block request may stay outstanding before it is forfeit.
    pub block_timeout: Duration,
    /// How often choke/unchoke decisions are recomputed.
    pub choke_interval: Duration,
    /// How often the optimistic unchoke slot rotates.
    pub optimistic_interval: Duration,
    /// Fallback announce period when the tracker doesn't supply one.
    pub announce_interval: Duration,
}

impl Default for TorrentConfig {
    fn default() -> Self {
        Self {
            max_peers: 50,
            listen_port: 6881,
            block_timeout: Duration::from_secs(30),
            choke_interval: Duration::from_secs(10),
            optimistic_interval: Duration::from_secs(30),
            announce_interval: Duration::from_secs(1800),
        }
    }
}

/// DHT node tuning.
///
/// The bootstrap list is configuration, not a baked-in constant; the
/// defaults are the well-known public routers.
#[derive(Debug, Clone)]
pub struct DhtConfig {
    /// UDP port to bind.
    pub port: u16,
    /// Seed nodes contacted at startup, as `host:port` strings.
    pub bootstrap_nodes: Vec<String>,
    /// Per-query timeout.
    pub query_timeout: Duration,
}

impl Default for DhtConfig {
    fn default() -> Self {
        Self {
            port: 6881,
            bootstrap_nodes: vec![
                "router.bittorrent.com:6881".to_string(),
                "dht.transmissionbt.com:6881".to_string(),
                "router.utorrent.com:6881".to_string(),
            ],
            query_timeout: Duration::from_secs(5),
        }
    }
}
