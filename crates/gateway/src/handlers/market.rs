//! `market.*`: subscription management over symbol rooms.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use crate::error::Result;
use crate::rooms::RoomRegistry;
use crate::session::{FieldValue, Session};
use crate::state::ServerState;
use protocol::response::{error_response, ErrorCode};

use super::{str_list, KNOWN_SYMBOLS};

/// Replace this session's market subscriptions with the requested set.
///
/// Subscribe is a full replacement, not an accumulation: every currently
/// joined `market:*` room is left first, so a client refreshing its
/// watchlist cannot leak stale subscriptions.
pub async fn subscribe(
    state: Arc<ServerState>,
    session: Arc<Session>,
    params: Value,
) -> Result<Value> {
    let symbols = str_list(&params, "symbols");
    if symbols.is_empty() {
        return Ok(error_response(
            ErrorCode::InvalidParams,
            "Symbols list is required",
        ));
    }

    let left_rooms = current_market_rooms(&state, &session);
    for room in &left_rooms {
        state.rooms.leave(room, &session.id);
    }

    let mut joined_rooms = Vec::with_capacity(symbols.len());
    for symbol in &symbols {
        let room = RoomRegistry::market_room(symbol);
        state.rooms.join(&room, &session.id);
        joined_rooms.push(room);
    }

    session.set_field(
        "subscribedRooms",
        FieldValue::StrList(joined_rooms.clone()),
        true,
    );

    debug!(
        session_id = %session.id,
        joined = joined_rooms.len(),
        left = left_rooms.len(),
        "market subscriptions replaced"
    );

    Ok(json!({
        "subscribed": symbols,
        "rooms": joined_rooms,
        "leftRooms": left_rooms,
        "message": "Successfully subscribed to market data",
    }))
}

/// Leave the rooms for the given symbols.
pub async fn unsubscribe(
    state: Arc<ServerState>,
    session: Arc<Session>,
    params: Value,
) -> Result<Value> {
    let symbols = str_list(&params, "symbols");

    let mut left_rooms = Vec::with_capacity(symbols.len());
    for symbol in &symbols {
        let room = RoomRegistry::market_room(symbol);
        state.rooms.leave(&room, &session.id);
        left_rooms.push(room);
    }

    // Keep the session's view of its subscriptions current.
    let remaining = current_market_rooms(&state, &session)
        .into_iter()
        .filter(|room| !left_rooms.contains(room))
        .collect::<Vec<_>>();
    session.set_field("subscribedRooms", FieldValue::StrList(remaining), true);

    Ok(json!({
        "unsubscribed": symbols,
        "rooms": left_rooms,
        "message": "Successfully unsubscribed from market data",
    }))
}

/// Current subscriptions plus the server's symbol universe.
pub async fn list(
    _state: Arc<ServerState>,
    session: Arc<Session>,
    _params: Value,
) -> Result<Value> {
    let subscribed = session.get_list("subscribedRooms").unwrap_or_default();
    Ok(json!({
        "subscribedRooms": subscribed,
        "availableSymbols": KNOWN_SYMBOLS,
        "message": "Market data subscription list retrieved from session state",
    }))
}

/// The `market:*` rooms this session is currently in. The session field
/// is authoritative when present; the registry scan covers sessions that
/// resumed before re-subscribing.
fn current_market_rooms(state: &ServerState, session: &Session) -> Vec<String> {
    let from_registry: Vec<String> = state
        .rooms
        .rooms_of(&session.id)
        .into_iter()
        .filter(|room| room.starts_with("market:"))
        .collect();
    if !from_registry.is_empty() {
        return from_registry;
    }
    session
        .get_list("subscribedRooms")
        .unwrap_or_default()
        .into_iter()
        .filter(|room| room.starts_with("market:"))
        .collect()
}
