//! Peer wire protocol (BEP-3, BEP-10), metadata exchange (BEP-9), and
//! per-torrent peer orchestration.
//!
//! The leaf components (bitfield, wire codec, piece assembler, piece
//! picker, peer state) are pure and independently testable; the transport
//! and manager wire them to real sockets.

mod assembler;
mod bitfield;
mod codec;
mod error;
mod extension;
mod manager;
mod message;
mod metadata;
mod peer_id;
mod picker;
mod state;
mod transport;

pub use assembler::{PieceAssembler, VerifyOutcome, BLOCK_SIZE};
pub use bitfield::Bitfield;
pub use codec::{WireDecoder, WireEvent};
pub use error::PeerError;
pub use extension::{ExtensionHandshake, EXTENSION_HANDSHAKE_ID};
pub use manager::PeerManager;
pub use message::{Handshake, Message, MessageId, HANDSHAKE_LEN};
pub use metadata::{
    metadata_piece_count, metadata_piece_size, MetadataEvent, MetadataExchange, MetadataMessage,
    MetadataMessageType, LOCAL_METADATA_ID, METADATA_PIECE_SIZE,
};
pub use peer_id::PeerId;
pub use picker::PiecePicker;
pub use state::{BlockRequest, PeerState, MAX_PIPELINE_DEPTH, REQUEST_TIMEOUT};
pub use transport::{PeerEvent, PeerLink};

#[cfg(test)]
mod tests;
