use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// The lifecycle event reported with an announce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerEvent {
    /// Periodic re-announce.
    None,
    /// First announce for this torrent.
    Started,
    /// Final announce when removing the torrent.
    Stopped,
    /// The download just finished.
    Completed,
}

impl TrackerEvent {
    /// The event's wire code in the UDP protocol.
    pub fn as_udp_id(&self) -> u32 {
        match self {
            TrackerEvent::None => 0,
            TrackerEvent::Completed => 1,
            TrackerEvent::Started => 2,
            TrackerEvent::Stopped => 3,
        }
    }
}

/// A successful announce: how long to wait before the next one, swarm
/// counts, and the peers handed back.
#[derive(Debug, Clone)]
pub struct AnnounceResponse {
    /// Seconds until the next announce.
    pub interval: u32,
    /// Seeder count, when reported.
    pub seeders: Option<u32>,
    /// Leecher count, when reported.
    pub leechers: Option<u32>,
    /// Peer addresses from the compact list.
    pub peers: Vec<SocketAddr>,
}

impl AnnounceResponse {
    pub fn new(interval: u32) -> Self {
        Self {
            interval,
            seeders: None,
            leechers: None,
            peers: Vec::new(),
        }
    }
}

/// Parses a compact IPv4 peer list: 6 bytes per peer, 4 of address and 2
/// of big-endian port. Trailing partial entries are ignored.
pub fn parse_compact_peers(data: &[u8]) -> Vec<SocketAddr> {
    data.chunks_exact(6)
        .map(|b| {
            let ip = Ipv4Addr::new(b[0], b[1], b[2], b[3]);
            let port = u16::from_be_bytes([b[4], b[5]]);
            SocketAddr::new(IpAddr::V4(ip), port)
        })
        .collect()
}
