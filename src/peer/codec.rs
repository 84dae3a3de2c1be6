use bytes::{Bytes, BytesMut};

use super::error::PeerError;
use super::message::{Handshake, Message, HANDSHAKE_LEN};

// A length prefix larger than this is treated as a protocol violation.
const MAX_MESSAGE_SIZE: usize = 2 * 1024 * 1024;

/// One decoded unit from the peer byte stream.
#[derive(Debug)]
pub enum WireEvent {
    /// The peer's handshake, produced exactly once per connection.
    Handshake(Handshake),
    /// A framed protocol message.
    Message(Message),
}

/// Streaming byte-to-message decoder for one peer connection.
///
/// The decoder first consumes exactly one 68-byte handshake, then produces
/// zero or more framed messages per byte arrival. Framing is length-first:
/// four bytes of big-endian length, then the payload; partial input waits
/// for more bytes.
///
/// # Examples
///
/// ```
/// use torrin::peer::{Handshake, Message, WireDecoder, WireEvent};
///
/// let mut decoder = WireDecoder::new();
/// decoder.feed(&Handshake::new([1; 20], [2; 20]).encode());
/// decoder.feed(&Message::Have { piece: 3 }.encode());
///
/// assert!(matches!(decoder.next().unwrap(), Some(WireEvent::Handshake(_))));
/// assert!(matches!(
///     decoder.next().unwrap(),
///     Some(WireEvent::Message(Message::Have { piece: 3 }))
/// ));
/// assert!(decoder.next().unwrap().is_none());
/// ```
#[derive(Debug, Default)]
pub struct WireDecoder {
    buf: BytesMut,
    handshake_done: bool,
}

impl WireDecoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(32 * 1024),
            handshake_done: false,
        }
    }

    /// Appends raw bytes from the socket to the decode buffer.
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Attempts to decode the next event.
    ///
    /// Returns `Ok(None)` when the buffered input doesn't yet hold a whole
    /// handshake or frame. A malformed handshake, oversized length prefix,
    /// or unknown message ID is an error; the connection should be dropped.
    pub fn next(&mut self) -> Result<Option<WireEvent>, PeerError> {
        if !self.handshake_done {
            if self.buf.len() < HANDSHAKE_LEN {
                return Ok(None);
            }
            let data = self.buf.split_to(HANDSHAKE_LEN);
            let handshake = Handshake::decode(&data)?;
            self.handshake_done = true;
            return Ok(Some(WireEvent::Handshake(handshake)));
        }

        if self.buf.len() < 4 {
            return Ok(None);
        }

        let length =
            u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;

        if length > MAX_MESSAGE_SIZE {
            return Err(PeerError::InvalidMessage(format!(
                "message too large: {}",
                length
            )));
        }

        if self.buf.len() < 4 + length {
            return Ok(None);
        }

        let frame: Bytes = self.buf.split_to(4 + length).freeze();
        Message::decode(frame).map(|m| Some(WireEvent::Message(m)))
    }
}
