//! MsgPack envelope carried inside DATA frames.
//!
//! The envelope is a self-describing map `{method: str, payload: map|bin,
//! id: u32}`. The inner `id` mirrors the frame-level message id truncated
//! to 32 bits and is tolerated for compatibility; only the frame header id
//! is authoritative. A payload that arrives as a byte string is surfaced
//! raw so the handler can decide whether to re-parse it (clients are free
//! to send structured parameters either as a nested MsgPack map or as
//! JSON-encoded bytes).

use rmpv::Value;

use crate::{ProtocolError, Result};

/// Decoded request/response envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub method: String,
    pub payload: EnvelopePayload,
}

/// The two payload encodings the wire tolerates.
#[derive(Debug, Clone, PartialEq)]
pub enum EnvelopePayload {
    /// A nested MsgPack map (or any non-binary MsgPack value).
    Map(Value),
    /// A raw byte string, typically UTF-8 JSON.
    Bytes(Vec<u8>),
}

impl EnvelopePayload {
    /// Interpret the payload as a JSON object.
    ///
    /// Byte payloads are parsed as JSON; map payloads are converted
    /// structurally. Anything unparseable degrades to an empty object,
    /// matching the reference server's permissive parameter handling.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            EnvelopePayload::Bytes(bytes) => {
                serde_json::from_slice(bytes).unwrap_or_else(|_| serde_json::json!({}))
            }
            EnvelopePayload::Map(value) => msgpack_to_json(value),
        }
    }
}

/// Encode an envelope with a raw byte payload.
pub fn encode_envelope_bytes(method: &str, payload: &[u8], id: u32) -> Result<Vec<u8>> {
    encode_envelope(method, Value::Binary(payload.to_vec()), id)
}

/// Encode an envelope with an arbitrary MsgPack payload value.
pub fn encode_envelope(method: &str, payload: Value, id: u32) -> Result<Vec<u8>> {
    let map = Value::Map(vec![
        (Value::from("method"), Value::from(method)),
        (Value::from("payload"), payload),
        (Value::from("id"), Value::from(id)),
    ]);
    let mut buf = Vec::new();
    rmpv::encode::write_value(&mut buf, &map)
        .map_err(|e| ProtocolError::Encode(e.to_string()))?;
    Ok(buf)
}

/// Decode the envelope portion of a DATA frame.
pub fn decode_envelope(data: &[u8]) -> Result<Envelope> {
    let mut cursor = data;
    let value = rmpv::decode::read_value(&mut cursor)
        .map_err(|e| ProtocolError::Malformed(format!("envelope parse failed: {e}")))?;

    let entries = match value {
        Value::Map(entries) => entries,
        other => {
            return Err(ProtocolError::Malformed(format!(
                "envelope is not a map: {other}"
            )))
        }
    };

    let mut method = None;
    let mut payload = None;
    for (key, val) in entries {
        let Some(key) = key.as_str() else { continue };
        match key {
            "method" => match val {
                Value::String(s) => match s.into_str() {
                    Some(s) => method = Some(s),
                    None => {
                        return Err(ProtocolError::Malformed(
                            "method is not valid UTF-8".into(),
                        ))
                    }
                },
                other => {
                    return Err(ProtocolError::Malformed(format!(
                        "method is not a string: {other}"
                    )))
                }
            },
            "payload" => {
                payload = Some(match val {
                    Value::Binary(bytes) => EnvelopePayload::Bytes(bytes),
                    other => EnvelopePayload::Map(other),
                });
            }
            // The inner `id` mirrors the frame header and is ignored.
            _ => {}
        }
    }

    let method =
        method.ok_or_else(|| ProtocolError::Malformed("envelope missing method".into()))?;
    let payload = payload.unwrap_or(EnvelopePayload::Map(Value::Map(Vec::new())));

    Ok(Envelope { method, payload })
}

/// Structural MsgPack → JSON conversion for handler parameters.
fn msgpack_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Nil => serde_json::Value::Null,
        Value::Boolean(b) => serde_json::Value::Bool(*b),
        Value::Integer(n) => {
            if let Some(i) = n.as_i64() {
                serde_json::Value::from(i)
            } else if let Some(u) = n.as_u64() {
                serde_json::Value::from(u)
            } else {
                serde_json::Value::Null
            }
        }
        Value::F32(f) => serde_json::Number::from_f64(f64::from(*f))
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::F64(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::String(s) => serde_json::Value::from(s.as_str().unwrap_or_default()),
        Value::Binary(bytes) => serde_json::from_slice(bytes).unwrap_or(serde_json::Value::Null),
        Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(msgpack_to_json).collect())
        }
        Value::Map(entries) => {
            let mut map = serde_json::Map::new();
            for (key, val) in entries {
                if let Some(key) = key.as_str() {
                    map.insert(key.to_string(), msgpack_to_json(val));
                }
            }
            serde_json::Value::Object(map)
        }
        Value::Ext(..) => serde_json::Value::Null,
    }
}

/// Convert a JSON value to a MsgPack value, used by tests and tooling that
/// build request payloads as JSON.
pub fn json_to_msgpack(value: &serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Nil,
        serde_json::Value::Bool(b) => Value::Boolean(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                Value::F64(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => Value::from(s.as_str()),
        serde_json::Value::Array(items) => {
            Value::Array(items.iter().map(json_to_msgpack).collect())
        }
        serde_json::Value::Object(map) => Value::Map(
            map.iter()
                .map(|(k, v)| (Value::from(k.as_str()), json_to_msgpack(v)))
                .collect(),
        ),
    }
}
