use std::ops::Range;

use bytes::Bytes;

use super::error::BencodeError;
use super::value::Value;

const MAX_DEPTH: usize = 64;

/// Decodes a bencode value from a byte slice.
///
/// The input must contain exactly one complete bencode value with no
/// trailing data.
///
/// # Errors
///
/// Returns an error if:
/// - The input is empty or truncated ([`BencodeError::UnexpectedEof`])
/// - The input contains invalid bencode syntax
/// - The nesting depth exceeds 64 levels ([`BencodeError::NestingTooDeep`])
/// - There is data after the value ([`BencodeError::TrailingData`])
///
/// # Examples
///
/// ```
/// use torrin::bencode::decode;
///
/// let int = decode(b"i42e").unwrap();
/// assert_eq!(int.as_integer(), Some(42));
///
/// let dict = decode(b"d4:name5:Alice3:agei30ee").unwrap();
/// assert_eq!(dict.get(b"name").and_then(|v| v.as_str()), Some("Alice"));
/// ```
pub fn decode(data: &[u8]) -> Result<Value, BencodeError> {
    let mut pos = 0;
    let value = decode_value(data, &mut pos, 0)?;

    if pos != data.len() {
        return Err(BencodeError::TrailingData);
    }

    Ok(value)
}

/// Decodes one bencode value from the front of `data`, returning the value
/// and the byte range it occupied.
///
/// Unlike [`decode`], trailing bytes are permitted; the returned range ends
/// where the value ends. This is how extension messages that carry raw data
/// after a bencoded header are split, and how callers can slice the exact
/// source bytes of a value.
///
/// ```
/// use torrin::bencode::decode_with_range;
///
/// let (value, range) = decode_with_range(b"d1:ai1eeTRAILER").unwrap();
/// assert_eq!(range, 0..8);
/// assert_eq!(value.get(b"a").and_then(|v| v.as_integer()), Some(1));
/// ```
pub fn decode_with_range(data: &[u8]) -> Result<(Value, Range<usize>), BencodeError> {
    let mut pos = 0;
    let value = decode_value(data, &mut pos, 0)?;
    Ok((value, 0..pos))
}

/// Finds the byte range of the `info` value inside a bencoded metainfo
/// dictionary without building any values.
///
/// The scan walks the dictionary byte-by-byte, skipping over each value in
/// place. Hashing the returned slice therefore matches what peers compute
/// even when the source bytes are not canonically ordered, which a
/// decode/re-encode cycle would not guarantee.
///
/// Returns `Ok(None)` if the top-level dictionary has no `info` key.
pub fn info_span(data: &[u8]) -> Result<Option<Range<usize>>, BencodeError> {
    if data.first() != Some(&b'd') {
        return Err(BencodeError::InvalidFormat(0));
    }

    let mut pos = 1;
    loop {
        if pos >= data.len() {
            return Err(BencodeError::UnexpectedEof);
        }
        if data[pos] == b'e' {
            return Ok(None);
        }

        let key = read_string_span(data, &mut pos)?;
        if &data[key] == b"info" {
            let start = pos;
            skip_value(data, &mut pos)?;
            return Ok(Some(start..pos));
        }
        skip_value(data, &mut pos)?;
    }
}

// Reads a length-prefixed string, returning the range of its payload bytes.
fn read_string_span(data: &[u8], pos: &mut usize) -> Result<Range<usize>, BencodeError> {
    if !data[*pos].is_ascii_digit() {
        return Err(BencodeError::InvalidDictKey);
    }

    let len_start = *pos;
    while *pos < data.len() && data[*pos] != b':' {
        *pos += 1;
    }
    if *pos >= data.len() {
        return Err(BencodeError::UnexpectedEof);
    }

    let len: usize = std::str::from_utf8(&data[len_start..*pos])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(BencodeError::InvalidStringLength)?;

    *pos += 1;
    if *pos + len > data.len() {
        return Err(BencodeError::UnexpectedEof);
    }

    let range = *pos..*pos + len;
    *pos += len;
    Ok(range)
}

// Advances past exactly one value without building it.
fn skip_value(data: &[u8], pos: &mut usize) -> Result<(), BencodeError> {
    let mut depth = 0usize;

    loop {
        if *pos >= data.len() {
            return Err(BencodeError::UnexpectedEof);
        }

        match data[*pos] {
            b'd' | b'l' => {
                depth += 1;
                *pos += 1;
            }
            b'e' => {
                if depth == 0 {
                    return Err(BencodeError::InvalidFormat(*pos));
                }
                depth -= 1;
                *pos += 1;
                if depth == 0 {
                    return Ok(());
                }
            }
            b'i' => {
                *pos += 1;
                while *pos < data.len() && data[*pos] != b'e' {
                    *pos += 1;
                }
                if *pos >= data.len() {
                    return Err(BencodeError::UnexpectedEof);
                }
                *pos += 1;
                if depth == 0 {
                    return Ok(());
                }
            }
            b'0'..=b'9' => {
                read_string_span(data, pos)?;
                if depth == 0 {
                    return Ok(());
                }
            }
            _ => return Err(BencodeError::InvalidFormat(*pos)),
        }
    }
}

fn decode_value(data: &[u8], pos: &mut usize, depth: usize) -> Result<Value, BencodeError> {
    if depth > MAX_DEPTH {
        return Err(BencodeError::NestingTooDeep);
    }

    if *pos >= data.len() {
        return Err(BencodeError::UnexpectedEof);
    }

    match data[*pos] {
        b'i' => decode_integer(data, pos),
        b'l' => decode_list(data, pos, depth),
        b'd' => decode_dict(data, pos, depth),
        b'0'..=b'9' => decode_bytes(data, pos),
        _ => Err(BencodeError::InvalidFormat(*pos)),
    }
}

fn decode_integer(data: &[u8], pos: &mut usize) -> Result<Value, BencodeError> {
    *pos += 1;

    let body_len = data[*pos..]
        .iter()
        .position(|&b| b == b'e')
        .ok_or(BencodeError::UnexpectedEof)?;
    let digits = std::str::from_utf8(&data[*pos..*pos + body_len])
        .map_err(|_| BencodeError::InvalidInteger("invalid utf8".into()))?;

    // Canonical form only: non-empty, no leading zeros, no negative zero.
    let canonical = matches!(
        digits.as_bytes(),
        [b'0'] | [b'1'..=b'9', ..] | [b'-', b'1'..=b'9', ..]
    );
    if !canonical {
        return Err(BencodeError::InvalidInteger(digits.into()));
    }

    let value = digits
        .parse()
        .map_err(|_| BencodeError::InvalidInteger(digits.into()))?;

    *pos += body_len + 1;
    Ok(Value::Integer(value))
}

fn decode_bytes(data: &[u8], pos: &mut usize) -> Result<Value, BencodeError> {
    let payload = read_string_span(data, pos)?;
    Ok(Value::Bytes(Bytes::copy_from_slice(&data[payload])))
}

fn decode_list(data: &[u8], pos: &mut usize, depth: usize) -> Result<Value, BencodeError> {
    *pos += 1;
    let mut items = Vec::new();

    loop {
        match data.get(*pos) {
            None => return Err(BencodeError::UnexpectedEof),
            Some(b'e') => {
                *pos += 1;
                return Ok(Value::List(items));
            }
            Some(_) => items.push(decode_value(data, pos, depth + 1)?),
        }
    }
}

fn decode_dict(data: &[u8], pos: &mut usize, depth: usize) -> Result<Value, BencodeError> {
    *pos += 1;
    let mut entries = Vec::new();

    loop {
        match data.get(*pos) {
            None => return Err(BencodeError::UnexpectedEof),
            Some(b'e') => {
                *pos += 1;
                return Ok(Value::Dict(entries));
            }
            Some(_) => {
                let key = match decode_value(data, pos, depth + 1)? {
                    Value::Bytes(b) => b,
                    _ => return Err(BencodeError::InvalidDictKey),
                };
                let value = decode_value(data, pos, depth + 1)?;
                entries.push((key, value));
            }
        }
    }
}
