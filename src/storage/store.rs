use std::collections::HashMap;

use bytes::Bytes;
use futures::future::BoxFuture;
use parking_lot::Mutex;

use super::error::StorageError;

/// Where verified pieces go and where served blocks come from.
///
/// The peer manager holds the store as a trait object: it writes each
/// verified piece exactly once and reads sub-piece blocks back when
/// serving peer requests. Implementations serialize their own mutations;
/// calls may run concurrently from different torrents.
pub trait PieceStore: Send + Sync {
    /// Persists a verified piece.
    fn write_piece(&self, index: u32, data: Bytes) -> BoxFuture<'_, Result<(), StorageError>>;

    /// Reads `length` bytes of piece `index` starting at `offset`.
    fn read_block(
        &self,
        index: u32,
        offset: u32,
        length: u32,
    ) -> BoxFuture<'_, Result<Bytes, StorageError>>;
}

/// An in-memory piece store.
///
/// Useful in tests and for ephemeral torrents that never touch disk.
#[derive(Debug, Default)]
pub struct MemoryStore {
    pieces: Mutex<HashMap<u32, Bytes>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pieces currently held.
    pub fn piece_count(&self) -> usize {
        self.pieces.lock().len()
    }

    /// A copy of a stored piece, if present.
    pub fn piece(&self, index: u32) -> Option<Bytes> {
        self.pieces.lock().get(&index).cloned()
    }
}

impl PieceStore for MemoryStore {
    fn write_piece(&self, index: u32, data: Bytes) -> BoxFuture<'_, Result<(), StorageError>> {
        Box::pin(async move {
            self.pieces.lock().insert(index, data);
            Ok(())
        })
    }

    fn read_block(
        &self,
        index: u32,
        offset: u32,
        length: u32,
    ) -> BoxFuture<'_, Result<Bytes, StorageError>> {
        Box::pin(async move {
            let pieces = self.pieces.lock();
            let piece = pieces
                .get(&index)
                .ok_or(StorageError::PieceMissing(index))?;

            let start = offset as usize;
            let end = start + length as usize;
            if end > piece.len() {
                return Err(StorageError::BlockOutOfRange {
                    piece: index,
                    offset,
                    length,
                });
            }

            Ok(piece.slice(start..end))
        })
    }
}
