use std::path::PathBuf;

use bytes::Bytes;

use super::error::MetainfoError;
use super::info_hash::InfoHash;
use crate::bencode::{decode, info_span, Value};

/// Immutable description of a torrent's content.
///
/// Built either by parsing a `.torrent` file ([`TorrentInfo::from_bytes`])
/// or from the raw `info` dictionary fetched from peers over ut_metadata
/// ([`TorrentInfo::from_info_bytes`]). Read-only once constructed.
///
/// # Examples
///
/// ```no_run
/// use torrin::metainfo::TorrentInfo;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let data = std::fs::read("example.torrent")?;
/// let info = TorrentInfo::from_bytes(&data)?;
///
/// println!("{}: {} bytes in {} pieces", info.name, info.total_size, info.piece_count());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TorrentInfo {
    /// SHA-1 of the raw bencoded `info` dictionary.
    pub info_hash: InfoHash,
    /// Suggested name for the file or directory.
    pub name: String,
    /// Number of bytes per piece (the last piece may be shorter).
    pub piece_length: u64,
    /// SHA-1 hash of each piece.
    pub pieces: Vec<[u8; 20]>,
    /// Total size of all files combined.
    pub total_size: u64,
    /// Files in content order, with cumulative byte offsets.
    pub files: Vec<FileEntry>,
    /// If true, clients should only use the metainfo's trackers (no DHT).
    pub is_private: bool,
    /// Primary tracker URL.
    pub announce: Option<String>,
    /// Multi-tier tracker list.
    pub announce_list: Vec<Vec<String>>,
    raw_info: Bytes,
}

/// A file within a torrent.
///
/// For single-file torrents there is one entry named after the torrent.
/// For multi-file torrents, paths are prefixed with the torrent name as the
/// containing directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Path to the file (relative to the download root).
    pub path: PathBuf,
    /// Size of the file in bytes.
    pub length: u64,
    /// Byte offset of this file within the logical content.
    pub offset: u64,
}

impl TorrentInfo {
    /// Parses a `.torrent` file from raw bytes.
    ///
    /// The info hash is computed over the exact source bytes of the `info`
    /// value (located by byte-level skip), so a metainfo whose dictionary
    /// keys were not canonically ordered still hashes to what the swarm
    /// expects.
    ///
    /// # Errors
    ///
    /// Returns an error if the data is not valid bencode, required fields
    /// are missing, or the `pieces` string is not a multiple of 20 bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, MetainfoError> {
        let span = info_span(data)?.ok_or(MetainfoError::MissingField("info"))?;
        let raw_info = Bytes::copy_from_slice(&data[span]);
        let info_hash = InfoHash::from_info_bytes(&raw_info);

        let value = decode(data)?;
        let info_value = value
            .get(b"info")
            .ok_or(MetainfoError::MissingField("info"))?;

        let mut info = parse_info(info_value, info_hash, raw_info)?;

        info.announce = value
            .get(b"announce")
            .and_then(|v| v.as_str())
            .map(String::from);

        info.announce_list = value
            .get(b"announce-list")
            .and_then(|v| v.as_list())
            .map(|list| {
                list.iter()
                    .filter_map(|tier| {
                        tier.as_list().map(|urls| {
                            urls.iter()
                                .filter_map(|u| u.as_str().map(String::from))
                                .collect()
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(info)
    }

    /// Builds a `TorrentInfo` from raw `info` dictionary bytes, as received
    /// from peers via the metadata exchange. Tracker fields are empty.
    pub fn from_info_bytes(raw_info: &[u8]) -> Result<Self, MetainfoError> {
        let info_hash = InfoHash::from_info_bytes(raw_info);
        let value = decode(raw_info)?;
        parse_info(&value, info_hash, Bytes::copy_from_slice(raw_info))
    }

    /// Returns the raw bencoded `info` dictionary.
    ///
    /// This is what gets served to peers requesting metadata over
    /// ut_metadata.
    pub fn raw_info(&self) -> &Bytes {
        &self.raw_info
    }

    /// Number of pieces.
    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    /// The expected size of piece `index` in bytes.
    pub fn piece_size(&self, index: u32) -> u64 {
        let start = index as u64 * self.piece_length;
        self.piece_length.min(self.total_size.saturating_sub(start))
    }

    /// Tracker URLs grouped into tiers, in announce order.
    ///
    /// If no `announce-list` is present the single `announce` URL forms a
    /// one-entry tier.
    pub fn announce_tiers(&self) -> Vec<Vec<String>> {
        let mut tiers: Vec<Vec<String>> = self
            .announce_list
            .iter()
            .filter(|tier| !tier.is_empty())
            .cloned()
            .collect();

        if tiers.is_empty() {
            if let Some(ref announce) = self.announce {
                tiers.push(vec![announce.clone()]);
            }
        }

        tiers
    }
}

fn parse_info(
    value: &Value,
    info_hash: InfoHash,
    raw_info: Bytes,
) -> Result<TorrentInfo, MetainfoError> {
    if value.as_dict().is_none() {
        return Err(MetainfoError::InvalidField("info"));
    }

    let name = value
        .get(b"name")
        .and_then(|v| v.as_str())
        .ok_or(MetainfoError::MissingField("name"))?
        .to_string();

    let piece_length = value
        .get(b"piece length")
        .and_then(|v| v.as_integer())
        .filter(|&len| len > 0)
        .ok_or(MetainfoError::MissingField("piece length"))? as u64;

    let pieces_bytes = value
        .get(b"pieces")
        .and_then(|v| v.as_bytes())
        .ok_or(MetainfoError::MissingField("pieces"))?;

    if pieces_bytes.len() % 20 != 0 {
        return Err(MetainfoError::InvalidField("pieces"));
    }

    let pieces: Vec<[u8; 20]> = pieces_bytes
        .chunks_exact(20)
        .map(|chunk| {
            let mut arr = [0u8; 20];
            arr.copy_from_slice(chunk);
            arr
        })
        .collect();

    let is_private = value
        .get(b"private")
        .and_then(|v| v.as_integer())
        .map(|v| v == 1)
        .unwrap_or(false);

    let (files, total_size) = if let Some(length) =
        value.get(b"length").and_then(|v| v.as_integer())
    {
        let length = length as u64;
        let file = FileEntry {
            path: PathBuf::from(&name),
            length,
            offset: 0,
        };
        (vec![file], length)
    } else if let Some(files_list) = value.get(b"files").and_then(|v| v.as_list()) {
        let mut files = Vec::new();
        let mut offset = 0u64;

        for file_value in files_list {
            let length = file_value
                .get(b"length")
                .and_then(|v| v.as_integer())
                .ok_or(MetainfoError::MissingField("file length"))? as u64;

            let path_list = file_value
                .get(b"path")
                .and_then(|v| v.as_list())
                .ok_or(MetainfoError::MissingField("file path"))?;

            let path: PathBuf = std::iter::once(name.clone())
                .chain(
                    path_list
                        .iter()
                        .filter_map(|p| p.as_str().map(String::from)),
                )
                .collect();

            files.push(FileEntry {
                path,
                length,
                offset,
            });

            offset += length;
        }

        (files, offset)
    } else {
        return Err(MetainfoError::MissingField("length or files"));
    };

    Ok(TorrentInfo {
        info_hash,
        name,
        piece_length,
        pieces,
        total_size,
        files,
        is_private,
        announce: None,
        announce_list: Vec::new(),
        raw_info,
    })
}
