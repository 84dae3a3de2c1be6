use bytes::Bytes;

use super::error::TorrentError;
use crate::bencode::{decode, encode, Value};
use crate::metainfo::InfoHash;
use crate::peer::Bitfield;

/// Resume-data boundary format: enough to rebuild a torrent's completed
/// state and announce counters without re-checking every piece.
///
/// Round-trips through a bencoded dict with keys `info_hash`,
/// `completed_pieces` (raw bitfield bytes), `uploaded`, `downloaded`, and
/// `save_path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeData {
    pub info_hash: InfoHash,
    /// Packed completed-piece bitfield, wire bit order.
    pub completed_pieces: Bytes,
    pub uploaded: u64,
    pub downloaded: u64,
    pub save_path: String,
}

impl ResumeData {
    /// Serializes to the bencoded form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let dict = Value::Dict(vec![
            (
                Bytes::from_static(b"info_hash"),
                Value::Bytes(Bytes::copy_from_slice(self.info_hash.as_bytes())),
            ),
            (
                Bytes::from_static(b"completed_pieces"),
                Value::Bytes(self.completed_pieces.clone()),
            ),
            (
                Bytes::from_static(b"uploaded"),
                Value::Integer(self.uploaded as i64),
            ),
            (
                Bytes::from_static(b"downloaded"),
                Value::Integer(self.downloaded as i64),
            ),
            (
                Bytes::from_static(b"save_path"),
                Value::string(&self.save_path),
            ),
        ]);
        encode(&dict)
    }

    /// Parses the bencoded form.
    pub fn from_bytes(data: &[u8]) -> Result<Self, TorrentError> {
        let value = decode(data)?;

        let info_hash = value
            .get(b"info_hash")
            .and_then(|v| v.as_bytes())
            .and_then(|b| InfoHash::from_slice(b).ok())
            .ok_or_else(|| TorrentError::InvalidResumeData("missing info_hash".into()))?;

        let completed_pieces = value
            .get(b"completed_pieces")
            .and_then(|v| v.as_bytes())
            .cloned()
            .ok_or_else(|| TorrentError::InvalidResumeData("missing completed_pieces".into()))?;

        let uploaded = value
            .get(b"uploaded")
            .and_then(|v| v.as_integer())
            .unwrap_or(0) as u64;

        let downloaded = value
            .get(b"downloaded")
            .and_then(|v| v.as_integer())
            .unwrap_or(0) as u64;

        let save_path = value
            .get(b"save_path")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        Ok(Self {
            info_hash,
            completed_pieces,
            uploaded,
            downloaded,
            save_path,
        })
    }

    /// The completed bitfield, sized to the torrent's piece count.
    pub fn completed_bitfield(&self, piece_count: usize) -> Bitfield {
        Bitfield::from_bytes(&self.completed_pieces, piece_count)
    }
}
