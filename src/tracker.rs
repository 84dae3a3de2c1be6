//! UDP tracker protocol ([BEP-15]).
//!
//! Trackers register us in a torrent's swarm and hand back peers. The UDP
//! protocol is a two-step exchange: a `connect` that yields a connection
//! id, then an `announce` carrying our stats that returns the peer list.
//! Every multi-byte field is network byte order, and each step validates
//! the echoed transaction id and action.
//!
//! HTTP trackers are outside this crate; tier iteration and fallthrough
//! live with the torrent controller.
//!
//! [BEP-15]: http://bittorrent.org/beps/bep_0015.html

mod error;
mod response;
mod udp;

pub use error::TrackerError;
pub use response::{parse_compact_peers, AnnounceResponse, TrackerEvent};
pub use udp::{AnnounceRequest, UdpTracker};

#[cfg(test)]
mod tests;
