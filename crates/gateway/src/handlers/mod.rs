//! Method handlers.
//!
//! One module per method family. Handlers parse their parameters out of
//! a JSON object (already lifted from the MsgPack envelope), act on the
//! shared state, and return the reply object; the dispatcher serializes
//! and enqueues it. Validation failures are returned as
//! `{error: {code, message}}` values, not `Err` — `Err` is reserved for
//! unexpected faults and maps to `INTERNAL_ERROR`.

pub mod auth;
pub mod history;
pub mod market;
pub mod orders;
pub mod system;

use serde_json::Value;

/// String parameter with a default.
pub(crate) fn str_or(params: &Value, key: &str, default: &str) -> String {
    params
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_string()
}

/// Optional string parameter; absent and empty both map to `None`.
pub(crate) fn str_opt(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Numeric parameter with a default; tolerates integer and float
/// encodings.
pub(crate) fn f64_or(params: &Value, key: &str, default: f64) -> f64 {
    params.get(key).and_then(Value::as_f64).unwrap_or(default)
}

/// Integer parameter with a default; tolerates float encodings, which
/// some clients produce for large timestamps.
pub(crate) fn i64_or(params: &Value, key: &str, default: i64) -> i64 {
    match params.get(key) {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(default),
        _ => default,
    }
}

/// String-array parameter; non-string entries are skipped.
pub(crate) fn str_list(params: &Value, key: &str) -> Vec<String> {
    params
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// The symbol universe served by the market feed and `history.latest`.
pub(crate) const KNOWN_SYMBOLS: [&str; 8] = [
    "ETH-USD", "BTC-USD", "ADA-USD", "SOL-USD", "DOGE-USD", "AVAX-USD", "MATIC-USD", "LINK-USD",
];

#[cfg(test)]
pub(crate) mod testutil {
    use std::sync::Arc;

    use crate::config::GatewayConfig;
    use crate::session::{FieldValue, Identity, Session};
    use crate::state::ServerState;
    use crate::stats::MetricsStyle;

    pub fn state() -> Arc<ServerState> {
        Arc::new(ServerState::new(
            GatewayConfig::default(),
            None,
            None,
            MetricsStyle::Measured,
        ))
    }

    pub fn session(state: &ServerState, client_id: &str) -> Arc<Session> {
        let (session, _) = state.sessions.lookup_or_create(Identity {
            client_id: client_id.to_string(),
            device_id: 42,
            session_token: [9u8; 16],
        });
        session
    }

    pub fn authed_session(state: &ServerState, client_id: &str) -> Arc<Session> {
        let session = self::session(state, client_id);
        session.set_field("authenticated", FieldValue::Str("true".into()), true);
        session.set_field(
            "userId",
            FieldValue::Str("trader-user-123".to_string()),
            true,
        );
        session
    }
}
