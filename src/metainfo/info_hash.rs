use std::fmt;

use sha1::{Digest, Sha1};

use super::error::MetainfoError;

/// A torrent's 20-byte v1 info hash: the SHA-1 of the bencoded `info`
/// dictionary.
///
/// This is the global identifier of a torrent. Two values are equal exactly
/// when their bytes are equal; the canonical text form is lowercase hex.
///
/// # Examples
///
/// ```
/// use torrin::metainfo::InfoHash;
///
/// let hash = InfoHash::from_hex("c12fe1c06bba254a9dc9f519b335aa7c1367a88a").unwrap();
/// assert_eq!(hash.to_hex(), "c12fe1c06bba254a9dc9f519b335aa7c1367a88a");
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct InfoHash(pub [u8; 20]);

impl InfoHash {
    /// Creates an info hash from raw bytes.
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Creates an info hash from a slice, which must be exactly 20 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, MetainfoError> {
        if bytes.len() != 20 {
            return Err(MetainfoError::InvalidInfoHashLength);
        }
        let mut arr = [0u8; 20];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    /// Computes the info hash of raw bencoded `info` dictionary bytes.
    pub fn from_info_bytes(info_bytes: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(info_bytes);
        Self(hasher.finalize().into())
    }

    /// Parses an info hash from a 40-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, MetainfoError> {
        if s.len() != 40 {
            return Err(MetainfoError::InvalidInfoHashLength);
        }
        let bytes = hex_decode(s).ok_or(MetainfoError::InvalidInfoHashLength)?;
        Self::from_slice(&bytes)
    }

    /// Returns the raw bytes of the info hash.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Converts to a lowercase hexadecimal string.
    pub fn to_hex(&self) -> String {
        self.0.iter().fold(String::with_capacity(40), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
            s
        })
    }
}

impl fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InfoHash({})", self.to_hex())
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
        .collect()
}
