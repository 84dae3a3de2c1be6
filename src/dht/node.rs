use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use super::error::DhtError;

// Unanswered queries a node may accumulate before its bucket evicts it.
const MAX_FAILURES: u8 = 3;
// A node unheard-from for this long is no longer offered to lookups.
const GOOD_WINDOW: Duration = Duration::from_secs(15 * 60);

/// A 160-bit Kademlia node identifier.
///
/// Closeness between ids is XOR distance, compared as a 160-bit
/// big-endian integer.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub [u8; 20]);

impl NodeId {
    pub fn generate() -> Self {
        Self(rand::random())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DhtError> {
        <[u8; 20]>::try_from(bytes)
            .map(Self)
            .map_err(|_| DhtError::InvalidNodeId)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// XOR distance to another id. Symmetric, and zero against itself.
    pub fn distance(&self, other: &NodeId) -> [u8; 20] {
        std::array::from_fn(|i| self.0[i] ^ other.0[i])
    }

    /// The bit position of the highest-order set bit of the XOR distance:
    /// 159 when the top bit differs, 0 for equal ids (and for ids that
    /// differ only in the lowest bit).
    pub fn bucket_index(&self, other: &NodeId) -> usize {
        let dist = self.distance(other);

        for (i, &byte) in dist.iter().enumerate() {
            if byte != 0 {
                let high = 7 - byte.leading_zeros() as usize;
                return (19 - i) * 8 + high;
            }
        }

        0
    }

    fn to_hex(self) -> String {
        self.0.iter().fold(String::with_capacity(40), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
            s
        })
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({}..)", &self.to_hex()[..8])
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// A known DHT node and its liveness bookkeeping.
///
/// A node is offered to lookups only while it is good: heard from within
/// the last 15 minutes and with no unanswered queries. Enough consecutive
/// failures turn it bad, at which point its bucket evicts it.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub addr: SocketAddr,
    pub last_seen: Instant,
    pub failures: u8,
}

impl Node {
    pub fn new(id: NodeId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
            failures: 0,
        }
    }

    /// Refreshes last-seen and forgives past failures.
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
        self.failures = 0;
    }

    /// Counts one unanswered query.
    pub fn fail(&mut self) {
        self.failures = self.failures.saturating_add(1);
    }

    pub fn is_good(&self) -> bool {
        self.failures == 0 && self.last_seen.elapsed() < GOOD_WINDOW
    }

    pub fn is_bad(&self) -> bool {
        self.failures >= MAX_FAILURES
    }

    /// Parses the 26-byte compact form: 20 bytes of id, 4 of IPv4
    /// address, 2 of big-endian port.
    pub fn from_compact(data: &[u8]) -> Option<Self> {
        let (id_bytes, rest) = data.split_first_chunk::<20>()?;
        let (ip_bytes, rest) = rest.split_first_chunk::<4>()?;
        let port_bytes: &[u8; 2] = rest.try_into().ok()?;

        let addr = SocketAddr::new(
            IpAddr::V4(Ipv4Addr::from(*ip_bytes)),
            u16::from_be_bytes(*port_bytes),
        );
        Some(Self::new(NodeId(*id_bytes), addr))
    }

    /// Encodes the 26-byte compact form; IPv6 addresses have none.
    pub fn to_compact(&self) -> Option<[u8; 26]> {
        let SocketAddr::V4(v4) = self.addr else {
            return None;
        };

        let mut compact = [0u8; 26];
        compact[..20].copy_from_slice(&self.id.0);
        compact[20..24].copy_from_slice(&v4.ip().octets());
        compact[24..].copy_from_slice(&v4.port().to_be_bytes());
        Some(compact)
    }
}
