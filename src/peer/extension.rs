use bytes::Bytes;

use super::error::PeerError;
use crate::bencode::{decode, encode, Value};

/// Extended message id reserved for the handshake itself (BEP-10).
pub const EXTENSION_HANDSHAKE_ID: u8 = 0;

/// The BEP-10 extended handshake payload: the `m` dictionary mapping
/// extension names to the ids the sender will accept them under, plus a few
/// optional fields.
#[derive(Debug, Clone, Default)]
pub struct ExtensionHandshake {
    /// Extension name → message id the sender listens on.
    pub extensions: Vec<(String, u8)>,
    /// Client name/version.
    pub client: Option<String>,
    /// Advertised request queue depth.
    pub reqq: Option<i64>,
    /// Size of the info dictionary, when the sender has it (BEP-9).
    pub metadata_size: Option<i64>,
}

impl ExtensionHandshake {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_extensions(extensions: &[(&str, u8)]) -> Self {
        let mut hs = Self::new();
        for (name, id) in extensions {
            hs.extensions.push(((*name).to_string(), *id));
        }
        hs
    }

    pub fn encode(&self) -> Bytes {
        let m: Vec<(Bytes, Value)> = self
            .extensions
            .iter()
            .map(|(name, id)| {
                (
                    Bytes::copy_from_slice(name.as_bytes()),
                    Value::Integer(*id as i64),
                )
            })
            .collect();

        let mut dict = vec![(Bytes::from_static(b"m"), Value::Dict(m))];

        if let Some(ref client) = self.client {
            dict.push((Bytes::from_static(b"v"), Value::string(client)));
        }

        if let Some(reqq) = self.reqq {
            dict.push((Bytes::from_static(b"reqq"), Value::Integer(reqq)));
        }

        if let Some(size) = self.metadata_size {
            dict.push((Bytes::from_static(b"metadata_size"), Value::Integer(size)));
        }

        Bytes::from(encode(&Value::Dict(dict)))
    }

    pub fn decode(data: &[u8]) -> Result<Self, PeerError> {
        let value = decode(data)?;
        if value.as_dict().is_none() {
            return Err(PeerError::Extension("expected dict".into()));
        }

        let mut hs = Self::new();

        if let Some(m) = value.get(b"m").and_then(|v| v.as_dict()) {
            for (key, val) in m {
                if let (Ok(name), Some(id)) = (std::str::from_utf8(key), val.as_integer()) {
                    if id > 0 {
                        hs.extensions.push((name.to_string(), id as u8));
                    }
                }
            }
        }

        hs.client = value
            .get(b"v")
            .and_then(|v| v.as_str())
            .map(String::from);

        hs.reqq = value.get(b"reqq").and_then(|v| v.as_integer());

        hs.metadata_size = value
            .get(b"metadata_size")
            .and_then(|v| v.as_integer());

        Ok(hs)
    }

    pub fn extension_id(&self, name: &str) -> Option<u8> {
        self.extensions
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, id)| *id)
    }
}
