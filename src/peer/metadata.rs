//! Metadata exchange extension (ut_metadata, BEP-9).
//!
//! Bootstraps download state from a bare info-hash: a magnet-only client
//! fetches the info dictionary in 16 KiB pieces from peers that already
//! hold it, then verifies the assembled bytes against the info-hash.

use std::collections::HashMap;

use bytes::Bytes;
use sha1::{Digest, Sha1};
use tracing::{debug, warn};

use super::error::PeerError;
use super::extension::{ExtensionHandshake, EXTENSION_HANDSHAKE_ID};
use super::message::Message;
use crate::bencode::{decode_with_range, encode, Value};
use crate::metainfo::{InfoHash, TorrentInfo};

/// The size of a metadata piece (16 KiB).
pub const METADATA_PIECE_SIZE: usize = 16384;

/// The extended message id we accept ut_metadata messages on.
pub const LOCAL_METADATA_ID: u8 = 1;

/// Message types for the ut_metadata extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataMessageType {
    /// Request a piece of metadata.
    Request = 0,
    /// Provide a piece of metadata.
    Data = 1,
    /// Reject a metadata request.
    Reject = 2,
}

impl MetadataMessageType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(MetadataMessageType::Request),
            1 => Some(MetadataMessageType::Data),
            2 => Some(MetadataMessageType::Reject),
            _ => None,
        }
    }
}

/// A ut_metadata message: a bencoded header dict, followed by raw piece
/// bytes for data messages.
#[derive(Debug, Clone)]
pub struct MetadataMessage {
    pub msg_type: MetadataMessageType,
    pub piece: u32,
    /// Total metadata size; only present in data messages.
    pub total_size: Option<u32>,
    /// The piece bytes; only present in data messages.
    pub data: Option<Bytes>,
}

impl MetadataMessage {
    pub fn request(piece: u32) -> Self {
        Self {
            msg_type: MetadataMessageType::Request,
            piece,
            total_size: None,
            data: None,
        }
    }

    pub fn data(piece: u32, total_size: u32, data: Bytes) -> Self {
        Self {
            msg_type: MetadataMessageType::Data,
            piece,
            total_size: Some(total_size),
            data: Some(data),
        }
    }

    pub fn reject(piece: u32) -> Self {
        Self {
            msg_type: MetadataMessageType::Reject,
            piece,
            total_size: None,
            data: None,
        }
    }

    /// Encodes the message: bencoded dict, then raw data for data messages.
    pub fn encode(&self) -> Bytes {
        let mut dict = vec![
            (
                Bytes::from_static(b"msg_type"),
                Value::Integer(self.msg_type as i64),
            ),
            (
                Bytes::from_static(b"piece"),
                Value::Integer(self.piece as i64),
            ),
        ];

        if let Some(total_size) = self.total_size {
            dict.push((
                Bytes::from_static(b"total_size"),
                Value::Integer(total_size as i64),
            ));
        }

        let mut encoded = encode(&Value::Dict(dict));

        if let Some(ref data) = self.data {
            encoded.extend_from_slice(data);
        }

        Bytes::from(encoded)
    }

    /// Decodes a metadata message, splitting the bencoded header from any
    /// trailing raw bytes.
    pub fn decode(payload: &[u8]) -> Result<Self, PeerError> {
        let (header, range) = decode_with_range(payload)?;

        let msg_type_byte = header
            .get(b"msg_type")
            .and_then(|v| v.as_integer())
            .ok_or_else(|| PeerError::Extension("missing msg_type".into()))?
            as u8;

        let msg_type = MetadataMessageType::from_byte(msg_type_byte)
            .ok_or_else(|| PeerError::Extension("invalid msg_type".into()))?;

        let piece = header
            .get(b"piece")
            .and_then(|v| v.as_integer())
            .ok_or_else(|| PeerError::Extension("missing piece".into()))? as u32;

        let total_size = header
            .get(b"total_size")
            .and_then(|v| v.as_integer())
            .map(|v| v as u32);

        let data = if msg_type == MetadataMessageType::Data && range.end < payload.len() {
            Some(Bytes::copy_from_slice(&payload[range.end..]))
        } else {
            None
        };

        Ok(Self {
            msg_type,
            piece,
            total_size,
            data,
        })
    }
}

/// Number of metadata pieces for a given metadata size.
pub fn metadata_piece_count(metadata_size: usize) -> usize {
    metadata_size.div_ceil(METADATA_PIECE_SIZE)
}

/// Size of metadata piece `piece` out of `total_size` bytes.
pub fn metadata_piece_size(piece: u32, total_size: usize) -> usize {
    let offset = piece as usize * METADATA_PIECE_SIZE;
    if offset >= total_size {
        0
    } else {
        (total_size - offset).min(METADATA_PIECE_SIZE)
    }
}

/// What the exchange wants done after routing one extended message.
#[derive(Debug)]
pub enum MetadataEvent {
    /// Nothing to do.
    None,
    /// Send these messages to the peer (a request batch, a data reply, ...).
    Send(Vec<Message>),
    /// The peer asked us for metadata piece `piece`.
    PeerRequest(u32),
    /// All pieces arrived and hashed to the info-hash.
    Complete(Box<TorrentInfo>),
}

/// Per-peer ut_metadata state machine.
///
/// Drives the extended-handshake + request/response loop against one peer:
/// once the peer's ut_metadata id and the metadata size are both known, a
/// full batch of piece requests goes out; data replies accumulate until
/// every piece is present, at which point the concatenation is verified
/// against the torrent's info-hash.
#[derive(Debug)]
pub struct MetadataExchange {
    info_hash: InfoHash,
    peer_metadata_id: Option<u8>,
    metadata_size: Option<usize>,
    pieces: HashMap<u32, Bytes>,
    requested: bool,
}

impl MetadataExchange {
    pub fn new(info_hash: InfoHash) -> Self {
        Self {
            info_hash,
            peer_metadata_id: None,
            metadata_size: None,
            pieces: HashMap::new(),
            requested: false,
        }
    }

    /// Our extended handshake, advertising ut_metadata on
    /// [`LOCAL_METADATA_ID`]. Sent right after the wire handshake to peers
    /// that set the extension bit.
    pub fn handshake_message(metadata_size: Option<usize>) -> Message {
        let mut hs = ExtensionHandshake::with_extensions(&[("ut_metadata", LOCAL_METADATA_ID)]);
        hs.metadata_size = metadata_size.map(|s| s as i64);
        Message::Extended {
            id: EXTENSION_HANDSHAKE_ID,
            payload: hs.encode(),
        }
    }

    /// The peer's ut_metadata id, once its handshake arrived.
    pub fn peer_metadata_id(&self) -> Option<u8> {
        self.peer_metadata_id
    }

    /// Routes one inbound `extended` message.
    ///
    /// `ext_id` 0 is the peer's extended handshake; our own
    /// [`LOCAL_METADATA_ID`] carries ut_metadata replies. Anything else is
    /// ignored.
    pub fn handle_extended(&mut self, ext_id: u8, payload: &[u8]) -> Result<MetadataEvent, PeerError> {
        match ext_id {
            EXTENSION_HANDSHAKE_ID => self.handle_handshake(payload),
            LOCAL_METADATA_ID => self.handle_metadata(payload),
            _ => Ok(MetadataEvent::None),
        }
    }

    fn handle_handshake(&mut self, payload: &[u8]) -> Result<MetadataEvent, PeerError> {
        let hs = ExtensionHandshake::decode(payload)?;

        if let Some(id) = hs.extension_id("ut_metadata") {
            self.peer_metadata_id = Some(id);
        }
        if let Some(size) = hs.metadata_size.filter(|&s| s > 0) {
            self.metadata_size = Some(size as usize);
        }

        let (Some(peer_id), Some(size)) = (self.peer_metadata_id, self.metadata_size) else {
            return Ok(MetadataEvent::None);
        };

        if self.requested {
            return Ok(MetadataEvent::None);
        }
        self.requested = true;

        let total_pieces = metadata_piece_count(size);
        debug!(size, total_pieces, "requesting metadata");

        let batch = (0..total_pieces as u32)
            .map(|piece| Message::Extended {
                id: peer_id,
                payload: MetadataMessage::request(piece).encode(),
            })
            .collect();

        Ok(MetadataEvent::Send(batch))
    }

    fn handle_metadata(&mut self, payload: &[u8]) -> Result<MetadataEvent, PeerError> {
        let msg = MetadataMessage::decode(payload)?;

        match msg.msg_type {
            MetadataMessageType::Request => Ok(MetadataEvent::PeerRequest(msg.piece)),
            MetadataMessageType::Data => {
                if let Some(size) = msg.total_size.filter(|&s| s > 0) {
                    self.metadata_size.get_or_insert(size as usize);
                }
                if let Some(data) = msg.data {
                    self.pieces.insert(msg.piece, data);
                }
                self.try_assemble()
            }
            MetadataMessageType::Reject => Ok(MetadataEvent::None),
        }
    }

    fn try_assemble(&mut self) -> Result<MetadataEvent, PeerError> {
        let Some(size) = self.metadata_size else {
            return Ok(MetadataEvent::None);
        };

        let total_pieces = metadata_piece_count(size);
        if (0..total_pieces as u32).any(|i| !self.pieces.contains_key(&i)) {
            return Ok(MetadataEvent::None);
        }

        let mut raw = Vec::with_capacity(size);
        for i in 0..total_pieces as u32 {
            raw.extend_from_slice(&self.pieces[&i]);
        }
        raw.truncate(size);

        let mut hasher = Sha1::new();
        hasher.update(&raw);
        let digest: [u8; 20] = hasher.finalize().into();

        if &digest != self.info_hash.as_bytes() {
            warn!("assembled metadata failed info-hash check, restarting");
            self.pieces.clear();
            return Ok(MetadataEvent::None);
        }

        let info = TorrentInfo::from_info_bytes(&raw)
            .map_err(|e| PeerError::Extension(format!("bad metadata: {}", e)))?;

        Ok(MetadataEvent::Complete(Box::new(info)))
    }
}
