//! Bencode encoding and decoding (BEP-3).
//!
//! Bencode is the self-describing value language everything else in the
//! protocol is written in: metainfo files, tracker responses, extension
//! messages, and the DHT's KRPC envelopes.

mod decode;
mod encode;
mod error;
mod value;

pub use decode::{decode, decode_with_range, info_span};
pub use encode::encode;
pub use error::BencodeError;
pub use value::Value;
