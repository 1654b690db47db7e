//! JSON response shapes shared by every handler.

use serde_json::{json, Value};

/// Error codes surfaced to clients in `{error: {code, message}}` replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidParams,
    RateLimitExceeded,
    AuthFailed,
    ServiceUnavailable,
    QueryFailed,
    NoData,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidParams => "INVALID_PARAMS",
            ErrorCode::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ErrorCode::AuthFailed => "AUTH_FAILED",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorCode::QueryFailed => "QUERY_FAILED",
            ErrorCode::NoData => "NO_DATA",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

/// Build a method-agnostic error reply.
pub fn error_response(code: ErrorCode, message: impl AsRef<str>) -> Value {
    json!({
        "error": {
            "code": code.as_str(),
            "message": message.as_ref(),
        }
    })
}

/// Whether a reply value is an error envelope.
pub fn is_error(value: &Value) -> bool {
    value.get("error").is_some()
}
