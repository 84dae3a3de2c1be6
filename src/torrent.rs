//! Per-torrent lifecycle: construction from metainfo or magnet, the
//! tracker announce loop, DHT-assisted peer discovery, and wait/status
//! surfaces.

mod controller;
mod error;
mod resume;

pub use controller::{Torrent, TorrentState, TorrentStatus};
pub use error::TorrentError;
pub use resume::ResumeData;

#[cfg(test)]
mod tests;
