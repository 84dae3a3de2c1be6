use super::value::Value;

/// Encodes a value to canonical bencode.
///
/// Dictionary keys are emitted in lexicographic byte order regardless of
/// entry order, so the output for a given value is always the same bytes.
///
/// ```
/// use torrin::bencode::{encode, Value};
///
/// let dict = Value::Dict(vec![
///     ("info".into(), Value::string("x")),
///     ("announce".into(), Value::string("t")),
/// ]);
/// assert!(encode(&dict).starts_with(b"d8:announce"));
/// ```
pub fn encode(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_value(value, &mut buf);
    buf
}

fn encode_value(value: &Value, buf: &mut Vec<u8>) {
    match value {
        Value::Integer(i) => {
            buf.push(b'i');
            buf.extend_from_slice(i.to_string().as_bytes());
            buf.push(b'e');
        }
        Value::Bytes(b) => {
            buf.extend_from_slice(b.len().to_string().as_bytes());
            buf.push(b':');
            buf.extend_from_slice(b);
        }
        Value::List(l) => {
            buf.push(b'l');
            for item in l {
                encode_value(item, buf);
            }
            buf.push(b'e');
        }
        Value::Dict(d) => {
            let mut entries: Vec<_> = d.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));

            buf.push(b'd');
            for (key, val) in entries {
                buf.extend_from_slice(key.len().to_string().as_bytes());
                buf.push(b':');
                buf.extend_from_slice(key);
                encode_value(val, buf);
            }
            buf.push(b'e');
        }
    }
}
