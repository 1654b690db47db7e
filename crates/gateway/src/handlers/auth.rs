//! `hello` and `logout`.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::info;

use crate::error::Result;
use crate::handshake::resolve_token;
use crate::session::{FieldValue, Session};
use crate::state::ServerState;
use protocol::response::{error_response, ErrorCode};

use super::str_or;

/// Authenticate the session and persist its principal.
pub async fn hello(
    _state: Arc<ServerState>,
    session: Arc<Session>,
    params: Value,
) -> Result<Value> {
    let token = str_or(&params, "token", "");
    let client_id = str_or(&params, "clientId", "");
    let device_id = str_or(&params, "deviceId", "");

    if token.is_empty() || client_id.is_empty() {
        return Ok(error_response(
            ErrorCode::InvalidParams,
            "Missing required parameters: token, clientId",
        ));
    }

    let Some(principal) = resolve_token(&token) else {
        return Ok(error_response(
            ErrorCode::AuthFailed,
            "Invalid or expired token",
        ));
    };

    let roles_json = serde_json::to_string(&principal.roles)?;
    session.set_field("userId", FieldValue::Str(principal.user_id.clone()), true);
    session.set_field("roles", FieldValue::Str(roles_json), true);
    session.set_field("authenticated", FieldValue::Str("true".to_string()), true);
    session.set_field("clientId", FieldValue::Str(client_id), false);
    session.set_field("deviceId", FieldValue::Str(device_id), false);

    info!(session_id = %session.id, user_id = %principal.user_id, "session authenticated");

    Ok(json!({
        "sessionId": session.id,
        "userId": principal.user_id,
        "roles": principal.roles,
        "token": session.identity.token_hex(),
        "sessionExpiryMs": session.expires_at().unwrap_or(0),
        "message": "Welcome to the trading gateway",
        "features": {
            "qos": "AtLeastOnce for orders",
            "rooms": "Market data subscriptions",
            "middleware": "Authentication & rate limiting",
            "reliable": "Session state management",
        },
    }))
}

/// Drop the session's principal and evict it from every room.
pub async fn logout(
    state: Arc<ServerState>,
    session: Arc<Session>,
    _params: Value,
) -> Result<Value> {
    session.set_field("authenticated", FieldValue::Str("false".to_string()), true);
    session.remove_field("userId");
    state.rooms.leave_all(&session.id);

    info!(session_id = %session.id, "session logged out");

    Ok(json!({
        "sessionId": session.id,
        "message": "Successfully logged out",
    }))
}
