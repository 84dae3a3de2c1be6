use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::bitfield::Bitfield;

/// Maximum number of outstanding block requests per peer.
pub const MAX_PIPELINE_DEPTH: usize = 5;

/// How long a block request may stay outstanding before it is forfeit.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A request for a specific block of a piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRequest {
    /// The piece index.
    pub piece_index: u32,
    /// Byte offset within the piece.
    pub offset: u32,
    /// Length of the block in bytes.
    pub length: u32,
}

impl BlockRequest {
    pub fn new(piece_index: u32, offset: u32, length: u32) -> Self {
        Self {
            piece_index,
            offset,
            length,
        }
    }
}

/// Protocol state for one peer connection.
///
/// Tracks the four choke/interest flags (both sides start choked and
/// uninterested), the peer's piece bitfield, and the pipeline of
/// outstanding block requests with their enqueue times. The pipeline never
/// exceeds [`MAX_PIPELINE_DEPTH`]; new requests are only admitted while
/// the peer isn't choking us and a slot is free.
#[derive(Debug)]
pub struct PeerState {
    /// We are choking the peer.
    pub am_choking: bool,
    /// We want the peer's data.
    pub am_interested: bool,
    /// The peer is choking us.
    pub peer_choking: bool,
    /// The peer wants our data.
    pub peer_interested: bool,
    /// Pieces the peer has advertised.
    pub bitfield: Bitfield,
    pending: HashMap<BlockRequest, Instant>,
}

impl PeerState {
    pub fn new(piece_count: usize) -> Self {
        Self {
            am_choking: true,
            am_interested: false,
            peer_choking: true,
            peer_interested: false,
            bitfield: Bitfield::new(piece_count),
            pending: HashMap::new(),
        }
    }

    /// True while another request may be pipelined: the peer isn't choking
    /// us and the pipeline is below its cap.
    pub fn can_request(&self) -> bool {
        !self.peer_choking && self.pending.len() < MAX_PIPELINE_DEPTH
    }

    /// Records a request as outstanding. Returns false if the pipeline is
    /// closed or the exact request is already pending.
    pub fn add_request(&mut self, request: BlockRequest, now: Instant) -> bool {
        if !self.can_request() || self.pending.contains_key(&request) {
            return false;
        }
        self.pending.insert(request, now);
        true
    }

    /// True if the exact `(piece, offset, length)` triple is outstanding.
    pub fn is_pending(&self, request: &BlockRequest) -> bool {
        self.pending.contains_key(request)
    }

    /// Removes the request matching an arrived `piece` message. Returns
    /// false if no such request was outstanding.
    pub fn complete_request(&mut self, request: &BlockRequest) -> bool {
        self.pending.remove(request).is_some()
    }

    /// Clears every outstanding request, returning them.
    ///
    /// Receiving `choke` voids all pending requests (BEP-3), so this runs
    /// on every choke.
    pub fn clear_pending(&mut self) -> Vec<BlockRequest> {
        self.pending.drain().map(|(req, _)| req).collect()
    }

    /// Returns the requests older than `timeout`, removing them from the
    /// pipeline. The pieces stay with the picker for re-offering.
    pub fn take_timed_out(&mut self, now: Instant, timeout: Duration) -> Vec<BlockRequest> {
        let expired: Vec<BlockRequest> = self
            .pending
            .iter()
            .filter(|(_, &sent_at)| now.duration_since(sent_at) >= timeout)
            .map(|(&req, _)| req)
            .collect();

        for req in &expired {
            self.pending.remove(req);
        }
        expired
    }

    /// Requests older than `timeout`, without removing them.
    pub fn timed_out_requests(&self, now: Instant, timeout: Duration) -> Vec<BlockRequest> {
        self.pending
            .iter()
            .filter(|(_, &sent_at)| now.duration_since(sent_at) >= timeout)
            .map(|(&req, _)| req)
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
