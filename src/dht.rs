//! Distributed Hash Table ([BEP-5]): trackerless peer discovery.
//!
//! Nodes carry 160-bit ids; torrents are located by their info-hash using
//! the Kademlia XOR metric. The pieces:
//!
//! - [`DhtNode`] — the UDP node: KRPC transactions, inbound query
//!   handling, bootstrap, maintenance
//! - [`RoutingTable`] — 160 k-buckets of up to 8 nodes each
//! - [`PeerStore`] — transient `announce_peer` storage with expiry
//! - [`DhtMessage`] — the bencoded KRPC envelope codec
//! - iterative `find_node` / `get_peers` lookups in [`lookup`](self)
//!
//! The bootstrap node list is configuration
//! ([`DhtConfig`](crate::config::DhtConfig)); the defaults are the
//! well-known public routers.
//!
//! [BEP-5]: http://bittorrent.org/beps/bep_0005.html

mod error;
mod lookup;
mod message;
mod node;
mod routing;
mod server;
mod storage;

pub use error::DhtError;
pub use message::{DhtMessage, DhtQuery, DhtResponse, TransactionId};
pub use node::{Node, NodeId};
pub use routing::{InsertOutcome, RoutingTable, K};
pub use server::DhtNode;
pub use storage::{PeerStore, MAX_PEERS_PER_KEY, PEER_TTL};

#[cfg(test)]
mod tests;
