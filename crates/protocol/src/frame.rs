//! Binary frame codec.
//!
//! Frame layout on the wire:
//!
//! ```text
//! DATA: 0x00 | msg_id u64 LE | MsgPack envelope {method, payload, id}
//! ACK:  0x01 | msg_id u64 LE
//! ```
//!
//! Decoding is total: every failure mode maps to `ProtocolError::Malformed`
//! and the caller drops the frame without replying.

use bytes::Bytes;

use crate::envelope::{self, Envelope};
use crate::{ProtocolError, Result};

const KIND_DATA: u8 = 0x00;
const KIND_ACK: u8 = 0x01;

/// Byte count of the kind prefix plus the message id.
pub const HEADER_LEN: usize = 9;

/// A decoded wire frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Data { msg_id: u64, envelope: Envelope },
    Ack { msg_id: u64 },
}

impl Frame {
    pub fn msg_id(&self) -> u64 {
        match self {
            Frame::Data { msg_id, .. } | Frame::Ack { msg_id } => *msg_id,
        }
    }
}

/// Encode a DATA frame from a method and an already-encoded envelope body.
///
/// Broadcast paths serialize the envelope once and stamp a per-session
/// message id per recipient, so the raw variant is the primitive and
/// [`encode_data`] is the convenience wrapper.
pub fn encode_data_raw(msg_id: u64, envelope_bytes: &[u8]) -> Bytes {
    let mut buf = Vec::with_capacity(HEADER_LEN + envelope_bytes.len());
    buf.push(KIND_DATA);
    buf.extend_from_slice(&msg_id.to_le_bytes());
    buf.extend_from_slice(envelope_bytes);
    Bytes::from(buf)
}

/// Encode a DATA frame carrying `method` and a MsgPack payload value.
pub fn encode_data(msg_id: u64, method: &str, payload: rmpv::Value) -> Result<Bytes> {
    let envelope_bytes = envelope::encode_envelope(method, payload, msg_id as u32)?;
    Ok(encode_data_raw(msg_id, &envelope_bytes))
}

/// Encode an ACK frame.
pub fn encode_ack(msg_id: u64) -> Bytes {
    let mut buf = Vec::with_capacity(HEADER_LEN);
    buf.push(KIND_ACK);
    buf.extend_from_slice(&msg_id.to_le_bytes());
    Bytes::from(buf)
}

/// Decode a frame from raw bytes.
pub fn decode(data: &[u8]) -> Result<Frame> {
    if data.len() < HEADER_LEN {
        return Err(ProtocolError::Malformed(format!(
            "short buffer: {} bytes",
            data.len()
        )));
    }

    let mut id_bytes = [0u8; 8];
    id_bytes.copy_from_slice(&data[1..HEADER_LEN]);
    let msg_id = u64::from_le_bytes(id_bytes);

    match data[0] {
        KIND_DATA => {
            let envelope = envelope::decode_envelope(&data[HEADER_LEN..])?;
            Ok(Frame::Data { msg_id, envelope })
        }
        KIND_ACK => {
            if data.len() != HEADER_LEN {
                return Err(ProtocolError::Malformed(format!(
                    "ack frame with {} trailing bytes",
                    data.len() - HEADER_LEN
                )));
            }
            Ok(Frame::Ack { msg_id })
        }
        other => Err(ProtocolError::Malformed(format!(
            "unknown frame kind 0x{other:02x}"
        ))),
    }
}
