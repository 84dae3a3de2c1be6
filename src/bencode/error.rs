use thiserror::Error;

/// Errors that can occur while decoding bencode.
///
/// # Examples
///
/// ```
/// use torrin::bencode::{decode, BencodeError};
///
/// // Truncated input
/// assert!(matches!(decode(b"i42"), Err(BencodeError::UnexpectedEof)));
///
/// // Leading zeros are invalid
/// assert!(matches!(decode(b"i007e"), Err(BencodeError::InvalidInteger(_))));
///
/// // Trailing data
/// assert!(matches!(decode(b"i42eextra"), Err(BencodeError::TrailingData)));
/// ```
#[derive(Debug, Error)]
pub enum BencodeError {
    /// Input ended before a complete value was parsed.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// Encountered a byte that cannot start or continue a value.
    #[error("invalid format at byte {0}")]
    InvalidFormat(usize),

    /// Integer is malformed (leading zeros, negative zero, empty, overflow).
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Byte string length prefix is not a valid number.
    #[error("invalid string length")]
    InvalidStringLength,

    /// Dictionary key is not a byte string.
    #[error("invalid dictionary key")]
    InvalidDictKey,

    /// Extra data exists after the bencode value.
    #[error("trailing data after value")]
    TrailingData,

    /// Recursion limit exceeded.
    #[error("nesting too deep")]
    NestingTooDeep,
}
