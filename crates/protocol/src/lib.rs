//! Wire protocol for the trading gateway.
//!
//! Two layers live here:
//!
//! - the binary frame layer: a one-byte kind prefix, a little-endian
//!   64-bit message id, and (for DATA frames) a MsgPack envelope carrying
//!   `{method, payload, id}`;
//! - the domain vocabulary shared by the gateway and its collaborators:
//!   orders, candles, alert rules, and the JSON response shapes clients
//!   consume.
//!
//! Reply payloads are UTF-8 JSON bytes inside the MsgPack envelope, so a
//! client can treat the outer layer as opaque framing and parse the inner
//! object with any JSON library.

pub mod envelope;
pub mod frame;
pub mod response;
pub mod types;

pub use envelope::{encode_envelope, Envelope};
pub use frame::{decode, encode_ack, encode_data, encode_data_raw, Frame};
pub use response::{error_response, ErrorCode};
pub use types::{
    Account, AlertEvent, AlertRule, Candle, Interval, MetricsSample, Order, OrderResult,
    OrderStatus, OrderType, Position, Side,
};

/// Errors produced while encoding or decoding wire data.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The buffer cannot be interpreted as a frame. Malformed input is
    /// dropped by the receiver without a reply.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// MsgPack serialization failed while building an outbound frame.
    #[error("envelope encode failed: {0}")]
    Encode(String),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
