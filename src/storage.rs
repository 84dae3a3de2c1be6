//! The disk side of the engine, as consumed by the peer manager.
//!
//! The orchestrator produces verified `(piece_index, piece_bytes)` pairs
//! and reads blocks back to serve peer requests; everything else about
//! disk layout lives behind the [`PieceStore`] trait. [`FileMap`] computes
//! how a piece range lands across the torrent's files, [`FileStore`] is a
//! plain-files implementation over that mapping, and [`MemoryStore`] keeps
//! pieces in memory for tests and ephemeral use.

mod error;
mod file_map;
mod file_store;
mod store;

pub use error::StorageError;
pub use file_map::{FileMap, FileSlice};
pub use file_store::FileStore;
pub use store::{MemoryStore, PieceStore};

#[cfg(test)]
mod tests;
