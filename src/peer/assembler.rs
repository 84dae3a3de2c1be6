use std::collections::HashSet;

use bytes::Bytes;
use sha1::{Digest, Sha1};
use tracing::warn;

use super::bitfield::Bitfield;

/// Standard block size (16 KiB): the request granularity within a piece.
pub const BLOCK_SIZE: u32 = 16384;

/// Outcome of verifying an assembled piece.
#[derive(Debug)]
pub enum VerifyOutcome {
    /// The piece hashed correctly; here are its bytes.
    Verified(Bytes),
    /// Hash mismatch. The buffer was discarded and the piece is eligible
    /// for re-selection.
    Corrupt,
}

// A piece is absent, being filled, or done. The three states are mutually
// exclusive by construction.
#[derive(Debug)]
enum PieceSlot {
    Absent,
    InProgress(PieceBuffer),
    Complete,
}

#[derive(Debug, Default)]
struct PieceBuffer {
    data: Vec<u8>,
    // Offsets of blocks actually received, as opposed to zero padding.
    blocks: HashSet<u32>,
}

/// Assembles in-progress pieces from blocks and verifies them on
/// completion.
///
/// Blocks may arrive at arbitrary offsets and from different peers; the
/// buffer grows with zero padding as needed and overwrites on duplicates.
/// Completion is polled: once a buffer reaches the expected piece size the
/// caller invokes [`complete_piece`](PieceAssembler::complete_piece), which
/// checks the SHA-1 against the metainfo hash.
#[derive(Debug)]
pub struct PieceAssembler {
    piece_length: u64,
    total_size: u64,
    hashes: Vec<[u8; 20]>,
    slots: Vec<PieceSlot>,
    completed: Bitfield,
}

impl PieceAssembler {
    pub fn new(piece_length: u64, total_size: u64, hashes: Vec<[u8; 20]>) -> Self {
        let piece_count = hashes.len();
        let slots = (0..piece_count).map(|_| PieceSlot::Absent).collect();
        Self {
            piece_length,
            total_size,
            hashes,
            slots,
            completed: Bitfield::new(piece_count),
        }
    }

    pub fn piece_count(&self) -> usize {
        self.hashes.len()
    }

    /// The expected size of piece `index`: `piece_length` except for the
    /// final piece, which takes whatever remains.
    pub fn expected_piece_size(&self, index: u32) -> u64 {
        let start = index as u64 * self.piece_length;
        self.piece_length.min(self.total_size.saturating_sub(start))
    }

    /// Begins assembling a piece. Idempotent; a completed piece stays
    /// complete.
    pub fn start_piece(&mut self, index: u32) {
        if let Some(slot @ PieceSlot::Absent) = self.slots.get_mut(index as usize) {
            *slot = PieceSlot::InProgress(PieceBuffer::default());
        }
    }

    /// Writes a block into the piece buffer at `offset`, growing the buffer
    /// with zero padding if the block lands past its current end. Blocks
    /// for completed or out-of-range pieces are dropped.
    pub fn add_block(&mut self, index: u32, offset: u32, data: &[u8]) {
        let Some(slot) = self.slots.get_mut(index as usize) else {
            return;
        };

        if matches!(slot, PieceSlot::Absent) {
            *slot = PieceSlot::InProgress(PieceBuffer::default());
        }

        if let PieceSlot::InProgress(buffer) = slot {
            let end = offset as usize + data.len();
            if buffer.data.len() < end {
                buffer.data.resize(end, 0);
            }
            buffer.data[offset as usize..end].copy_from_slice(data);
            buffer.blocks.insert(offset);
        }
    }

    /// True if a block starting at `offset` has been received for this
    /// piece (zero padding doesn't count).
    pub fn has_block(&self, index: u32, offset: u32) -> bool {
        match self.slots.get(index as usize) {
            Some(PieceSlot::InProgress(buffer)) => buffer.blocks.contains(&offset),
            _ => false,
        }
    }

    /// True once the piece buffer holds at least the expected number of
    /// bytes and is ready for verification.
    pub fn is_ready(&self, index: u32) -> bool {
        match self.slots.get(index as usize) {
            Some(PieceSlot::InProgress(buffer)) => {
                buffer.data.len() as u64 >= self.expected_piece_size(index)
            }
            _ => false,
        }
    }

    /// Verifies an assembled piece against its SHA-1.
    ///
    /// On a match the piece becomes complete and its bytes are returned for
    /// writing out. On a mismatch the buffer is discarded and the piece
    /// returns to absent, eligible for re-selection. Verifying an absent or
    /// already-complete piece returns `Corrupt` without changing state.
    pub fn complete_piece(&mut self, index: u32) -> VerifyOutcome {
        let Some(slot) = self.slots.get_mut(index as usize) else {
            return VerifyOutcome::Corrupt;
        };

        let buffer = match std::mem::replace(slot, PieceSlot::Absent) {
            PieceSlot::InProgress(buffer) => buffer,
            other => {
                *slot = other;
                return VerifyOutcome::Corrupt;
            }
        };

        let expected = self.expected_piece_size(index) as usize;
        let mut data = buffer.data;
        data.truncate(expected);

        let mut hasher = Sha1::new();
        hasher.update(&data);
        let digest: [u8; 20] = hasher.finalize().into();

        if digest == self.hashes[index as usize] {
            self.slots[index as usize] = PieceSlot::Complete;
            self.completed.set(index as usize);
            VerifyOutcome::Verified(Bytes::from(data))
        } else {
            warn!(piece = index, "piece failed hash check, discarding");
            VerifyOutcome::Corrupt
        }
    }

    /// Marks a piece complete without data, e.g. when seeding from resume
    /// state.
    pub fn mark_complete(&mut self, index: u32) {
        if let Some(slot) = self.slots.get_mut(index as usize) {
            *slot = PieceSlot::Complete;
            self.completed.set(index as usize);
        }
    }

    pub fn has_piece(&self, index: u32) -> bool {
        self.completed.has(index as usize)
    }

    pub fn in_progress(&self, index: u32) -> bool {
        matches!(
            self.slots.get(index as usize),
            Some(PieceSlot::InProgress(_))
        )
    }

    /// Our piece bitfield.
    pub fn completed(&self) -> &Bitfield {
        &self.completed
    }

    /// Fraction of pieces completed, in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        if self.hashes.is_empty() {
            return 0.0;
        }
        self.completed.count() as f64 / self.hashes.len() as f64
    }

    pub fn is_complete(&self) -> bool {
        self.completed.all_set()
    }
}
