//! torrin - a BitTorrent engine library
//!
//! The moving parts of a BitTorrent client, without the client: given a
//! `.torrent` file or a magnet link, the crate discovers peers, speaks the
//! peer wire protocol, assembles and verifies content, and republishes
//! completion.
//!
//! # Modules
//!
//! - [`bencode`] - BEP-3 bencode encoding/decoding
//! - [`metainfo`] - torrent metainfo, info hashes, magnet links
//! - [`peer`] - BEP-3/9/10 peer wire protocol, metadata exchange, and the
//!   per-torrent peer manager
//! - [`torrent`] - per-torrent lifecycle, announce loop, resume data
//! - [`tracker`] - BEP-15 UDP tracker protocol
//! - [`dht`] - BEP-5 Kademlia DHT
//! - [`storage`] - the disk interface the engine consumes
//! - [`config`] - tunables with sensible defaults

pub mod bencode;
pub mod config;
pub mod dht;
pub mod metainfo;
pub mod peer;
pub mod storage;
pub mod torrent;
pub mod tracker;

pub use bencode::{decode, encode, BencodeError, Value};
pub use config::{DhtConfig, TorrentConfig};
pub use dht::{DhtError, DhtMessage, DhtNode, Node, NodeId, RoutingTable};
pub use metainfo::{InfoHash, MagnetLink, MetainfoError, TorrentInfo};
pub use peer::{
    Bitfield, BlockRequest, Handshake, Message, MetadataExchange, PeerError, PeerId, PeerManager,
    PeerState, PieceAssembler, PiecePicker,
};
pub use storage::{FileMap, FileStore, MemoryStore, PieceStore, StorageError};
pub use torrent::{ResumeData, Torrent, TorrentError, TorrentState, TorrentStatus};
pub use tracker::{AnnounceResponse, TrackerError, TrackerEvent, UdpTracker};
