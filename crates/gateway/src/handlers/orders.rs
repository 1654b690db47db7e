//! `orders.*`: placement, cancellation, status, history.

use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;

use history::OrderLogEntry;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::session::{FieldValue, Session};
use crate::state::ServerState;
use protocol::response::{error_response, ErrorCode};
use protocol::{Order, OrderResult, OrderStatus, OrderType, Side};

use super::{f64_or, i64_or, str_or};

const RATE_LIMIT_WINDOW_MS: i64 = 1_000;
const RATE_LIMIT_FIELD: &str = "rateLimit_orders.place";

/// Place an order, bound to its idempotency key.
///
/// Order of operations matters: the rate limiter runs before anything
/// else (a rate-limited call must not touch the risk validator), the
/// idempotency lookup short-circuits replays before a new order id is
/// minted, and the order-log append can never fail the reply.
pub async fn place(
    state: Arc<ServerState>,
    session: Arc<Session>,
    params: Value,
) -> Result<Value> {
    let now_ms = ServerState::now_ms();

    // Rate limit, one order per second per session, regardless of key.
    if let Some(last) = session.get_int(RATE_LIMIT_FIELD) {
        if now_ms - last < RATE_LIMIT_WINDOW_MS {
            debug!(session_id = %session.id, "order rate limit exceeded");
            return Ok(error_response(
                ErrorCode::RateLimitExceeded,
                "Too many requests",
            ));
        }
    }
    session.set_field(RATE_LIMIT_FIELD, FieldValue::Int(now_ms), false);

    // Missing fields take documented defaults rather than rejecting.
    let idempotency_key = str_or(&params, "idempotencyKey", "DEFAULT_KEY");
    let symbol = str_or(&params, "symbol", "BTC-USD");
    let side_str = str_or(&params, "side", "BUY");
    let type_str = str_or(&params, "type", "LIMIT");
    let qty = f64_or(&params, "qty", 1.0);
    let price = f64_or(&params, "price", 50_000.0);

    // A replayed key answers with the previously computed outcome,
    // enriched with this request's order metadata. The validator is
    // never consulted again.
    if let Some(cached) = state.idempotency.get(&idempotency_key) {
        debug!(session_id = %session.id, key = %idempotency_key, "idempotent replay served from cache");
        return Ok(order_reply(
            &cached, &session.id, &symbol, &side_str, &type_str, qty, price, &idempotency_key,
        ));
    }

    let order_id = format!("ORD_{now_ms}");
    let order = Order {
        order_id: order_id.clone(),
        idempotency_key: idempotency_key.clone(),
        symbol: symbol.clone(),
        order_type: OrderType::parse(&type_str),
        side: Side::parse(&side_str),
        qty,
        price,
    };

    let account = state.account_for(&session);
    let positions: Vec<protocol::Position> = Vec::new();

    if let Err(reason) = state.risk.validate(&account, &positions, &order) {
        info!(session_id = %session.id, %order_id, reason = %reason, "order rejected by risk");
        let result = OrderResult::rejected(&order_id, &idempotency_key, reason);
        state.idempotency.put(&idempotency_key, result.clone());
        return Ok(order_reply(
            &result, &session.id, &symbol, &side_str, &type_str, qty, price, &idempotency_key,
        ));
    }

    // No matching engine behind this gateway: market orders fill, limit
    // orders are acknowledged.
    let status = match order.order_type {
        OrderType::Market => OrderStatus::Filled,
        OrderType::Limit => OrderStatus::Ack,
    };
    let result = OrderResult::new(status, &order_id, &idempotency_key);
    state.idempotency.put(&idempotency_key, result.clone());

    append_order_log(&state, &session.id, &result, &order, now_ms);

    session.set_field("lastOrderId", FieldValue::Str(order_id.clone()), false);
    session.set_field(
        "lastOrderStatus",
        FieldValue::Str(status.as_i32().to_string()),
        false,
    );

    state.stats.total_orders_placed.fetch_add(1, Relaxed);
    metrics::counter!("gateway_orders_placed_total").increment(1);
    state.check_and_broadcast_alerts();

    info!(session_id = %session.id, %order_id, status = status.as_str(), "order placed");

    Ok(order_reply(
        &result, &session.id, &symbol, &side_str, &type_str, qty, price, &idempotency_key,
    ))
}

/// Build the `orders.place` reply: cached and fresh outcomes share this
/// shape, so duplicate requests get byte-equal core fields.
#[allow(clippy::too_many_arguments)]
fn order_reply(
    result: &OrderResult,
    session_id: &str,
    symbol: &str,
    side: &str,
    order_type: &str,
    qty: f64,
    price: f64,
    idempotency_key: &str,
) -> Value {
    json!({
        "status": result.status.as_i32(),
        "orderId": result.order_id,
        "echoKey": result.echo_key,
        "reason": result.reason,
        "sessionId": session_id,
        "symbol": symbol,
        "side": side,
        "type": order_type,
        "price": price,
        "quantity": qty,
        "idempotencyKey": idempotency_key,
    })
}

fn append_order_log(
    state: &ServerState,
    session_id: &str,
    result: &OrderResult,
    order: &Order,
    now_ms: i64,
) {
    let Some(writer) = &state.order_log else {
        return;
    };
    let details = json!({
        "orderId": order.order_id,
        "symbol": order.symbol,
        "side": order.side,
        "type": order.order_type,
        "quantity": order.qty,
        "price": order.price,
        "status": result.status.as_i32(),
        "sessionId": session_id,
        "timestamp": now_ms,
    });
    let queued = writer.enqueue(OrderLogEntry {
        idempotency_key: order.idempotency_key.clone(),
        status: result.status.as_str().to_string(),
        order_id: order.order_id.clone(),
        result_json: details.to_string(),
    });
    if !queued {
        warn!(order_id = %order.order_id, "order log writer unavailable");
    }
}

/// Cancel an order by id. The gateway has no live order book, so the
/// cancellation is an audit-log event plus an acknowledgement.
pub async fn cancel(
    state: Arc<ServerState>,
    session: Arc<Session>,
    params: Value,
) -> Result<Value> {
    let order_id = str_or(&params, "orderId", "");
    if order_id.is_empty() {
        return Ok(error_response(ErrorCode::InvalidParams, "Missing orderId"));
    }

    let now_ms = ServerState::now_ms();

    // Preserve the original order's details in the cancellation record
    // when the log still has them.
    let mut details = json!({
        "symbol": "",
        "side": "",
        "price": 0.0,
        "quantity": 0.0,
        "type": "",
    });
    if let Some(repo) = &state.history {
        match repo.order_details(&order_id).await {
            Ok(Some(original)) => {
                if let Ok(result) = serde_json::from_str::<Value>(&original.result_json) {
                    for key in ["symbol", "side", "price", "quantity", "type"] {
                        if let Some(v) = result.get(key) {
                            details[key] = v.clone();
                        }
                    }
                }
            }
            Ok(None) => {}
            Err(e) => warn!(%order_id, error = %e, "original order lookup failed"),
        }
    }
    details["orderId"] = json!(order_id);
    details["status"] = json!("CANCELLED");
    details["sessionId"] = json!(session.id);
    details["timestamp"] = json!(now_ms);
    details["cancelledAt"] = json!(now_ms);

    if let Some(writer) = &state.order_log {
        writer.enqueue(OrderLogEntry {
            idempotency_key: format!("CANCEL_{order_id}"),
            status: "CANCELLED".to_string(),
            order_id: order_id.clone(),
            result_json: details.to_string(),
        });
    }

    state.stats.total_orders_cancelled.fetch_add(1, Relaxed);
    metrics::counter!("gateway_orders_cancelled_total").increment(1);
    state.check_and_broadcast_alerts();

    info!(session_id = %session.id, %order_id, "order cancelled");

    Ok(json!({
        "status": OrderStatus::Canceled.as_i32(),
        "orderId": order_id,
        "message": "Order canceled successfully",
    }))
}

/// Last order placed on this session, from session state.
pub async fn status(
    _state: Arc<ServerState>,
    session: Arc<Session>,
    _params: Value,
) -> Result<Value> {
    Ok(json!({
        "lastOrderId": session.get_str("lastOrderId").unwrap_or_else(|| "none".to_string()),
        "lastOrderStatus": session.get_str("lastOrderStatus").unwrap_or_else(|| "none".to_string()),
        "message": "Order status retrieved from session state",
    }))
}

/// Recent order-log rows from the history backend.
pub async fn order_history(
    state: Arc<ServerState>,
    _session: Arc<Session>,
    params: Value,
) -> Result<Value> {
    let from_time = positive_secs(i64_or(&params, "fromTime", 0));
    let to_time = positive_secs(i64_or(&params, "toTime", 0));
    let limit = i64_or(&params, "limit", 100).min(1_000);

    let Some(repo) = &state.history else {
        return Ok(error_response(
            ErrorCode::ServiceUnavailable,
            "History repository not initialized",
        ));
    };

    let records = match repo.order_history(from_time, to_time, limit).await {
        Ok(records) => records,
        Err(e) => {
            warn!(error = %e, "order history query failed");
            return Ok(error_response(
                ErrorCode::QueryFailed,
                format!("Failed to fetch order history: {e}"),
            ));
        }
    };

    let orders: Vec<Value> = records
        .iter()
        .map(|r| {
            json!({
                "idempotencyKey": r.idempotency_key,
                "status": r.status,
                "orderId": r.order_id,
                "result": serde_json::from_str::<Value>(&r.result_json)
                    .unwrap_or(Value::Null),
                "ts": r.created_at,
            })
        })
        .collect();

    Ok(json!({
        "success": true,
        "count": orders.len(),
        "orders": orders,
        "message": "Order history retrieved successfully",
    }))
}

/// Client timestamps arrive in milliseconds; the backend takes seconds.
fn positive_secs(ms: i64) -> Option<i64> {
    if ms > 0 {
        Some(ms / 1_000)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testutil;
    use protocol::response::is_error;

    fn order_params(key: &str) -> Value {
        json!({
            "idempotencyKey": key,
            "symbol": "ETH-USD",
            "side": "BUY",
            "type": "LIMIT",
            "qty": 2.0,
            "price": 1000.0,
        })
    }

    #[tokio::test]
    async fn place_acks_limit_order_and_updates_session() {
        let state = testutil::state();
        let session = testutil::authed_session(&state, "trader-1");

        let reply = place(state.clone(), session.clone(), order_params("K1"))
            .await
            .unwrap();

        assert_eq!(reply["status"], OrderStatus::Ack.as_i32());
        assert!(reply["orderId"].as_str().unwrap().starts_with("ORD_"));
        assert_eq!(reply["echoKey"], "K1");
        assert_eq!(reply["symbol"], "ETH-USD");
        assert_eq!(session.get_str("lastOrderId"), reply["orderId"].as_str().map(String::from));
        assert_eq!(session.get_str("lastOrderStatus").as_deref(), Some("1"));
        assert_eq!(state.stats.total_orders_placed.load(Relaxed), 1);
    }

    #[tokio::test]
    async fn market_orders_fill() {
        let state = testutil::state();
        let session = testutil::authed_session(&state, "trader-1");
        let reply = place(
            state.clone(),
            session,
            json!({"idempotencyKey": "K2", "type": "MARKET", "qty": 0.5, "price": 100.0}),
        )
        .await
        .unwrap();
        assert_eq!(reply["status"], OrderStatus::Filled.as_i32());
    }

    #[tokio::test]
    async fn replay_returns_cached_outcome_with_fresh_metadata() {
        let state = testutil::state();
        let session = testutil::authed_session(&state, "trader-1");

        let first = place(state.clone(), session.clone(), order_params("K1"))
            .await
            .unwrap();

        // Sidestep the rate limiter the way a retry after 1s would.
        session.remove_field(RATE_LIMIT_FIELD);

        let second = place(state.clone(), session.clone(), order_params("K1"))
            .await
            .unwrap();

        for key in ["status", "orderId", "echoKey", "reason"] {
            assert_eq!(first[key], second[key], "field {key} must match on replay");
        }
        // Only one order actually went through.
        assert_eq!(state.stats.total_orders_placed.load(Relaxed), 1);
    }

    #[tokio::test]
    async fn second_order_within_window_is_rate_limited() {
        let state = testutil::state();
        let session = testutil::authed_session(&state, "trader-1");

        let first = place(state.clone(), session.clone(), order_params("K1"))
            .await
            .unwrap();
        assert!(!is_error(&first));

        // Different key, same second: still limited.
        let second = place(state.clone(), session.clone(), order_params("K2"))
            .await
            .unwrap();
        assert_eq!(second["error"]["code"], "RATE_LIMIT_EXCEEDED");
        // The rejected call never reached risk validation or the cache.
        assert!(state.idempotency.get("K2").is_none());
    }

    #[tokio::test]
    async fn risk_rejection_is_cached() {
        let state = testutil::state();
        let session = testutil::authed_session(&state, "trader-1");

        // Notional 10 * 50_000 blows the $100k limit.
        let reply = place(
            state.clone(),
            session.clone(),
            json!({"idempotencyKey": "BIG", "qty": 10.0, "price": 50_000.0}),
        )
        .await
        .unwrap();
        assert_eq!(reply["status"], OrderStatus::Rejected.as_i32());
        assert!(reply["reason"].as_str().unwrap().contains("notional"));

        let cached = state.idempotency.get("BIG").unwrap();
        assert_eq!(cached.status, OrderStatus::Rejected);
        // Rejections do not count as placed orders.
        assert_eq!(state.stats.total_orders_placed.load(Relaxed), 0);
    }

    #[tokio::test]
    async fn missing_fields_take_documented_defaults() {
        let state = testutil::state();
        let session = testutil::authed_session(&state, "trader-1");
        let reply = place(state.clone(), session, json!({})).await.unwrap();
        assert_eq!(reply["echoKey"], "DEFAULT_KEY");
        assert_eq!(reply["symbol"], "BTC-USD");
        assert_eq!(reply["side"], "BUY");
        assert_eq!(reply["type"], "LIMIT");
        assert_eq!(reply["quantity"], 1.0);
        assert_eq!(reply["price"], 50_000.0);
    }

    #[tokio::test]
    async fn cancel_requires_order_id() {
        let state = testutil::state();
        let session = testutil::authed_session(&state, "trader-1");
        let reply = cancel(state.clone(), session, json!({})).await.unwrap();
        assert_eq!(reply["error"]["code"], "INVALID_PARAMS");
    }

    #[tokio::test]
    async fn cancel_acknowledges_and_counts() {
        let state = testutil::state();
        let session = testutil::authed_session(&state, "trader-1");
        let reply = cancel(state.clone(), session, json!({"orderId": "ORD_42"}))
            .await
            .unwrap();
        assert_eq!(reply["status"], OrderStatus::Canceled.as_i32());
        assert_eq!(reply["orderId"], "ORD_42");
        assert_eq!(state.stats.total_orders_cancelled.load(Relaxed), 1);
    }

    #[tokio::test]
    async fn status_defaults_to_none() {
        let state = testutil::state();
        let session = testutil::authed_session(&state, "trader-1");
        let reply = status(state.clone(), session.clone(), json!({})).await.unwrap();
        assert_eq!(reply["lastOrderId"], "none");
        assert_eq!(reply["lastOrderStatus"], "none");
    }

    #[tokio::test]
    async fn order_history_without_backend_is_unavailable() {
        let state = testutil::state();
        let session = testutil::authed_session(&state, "trader-1");
        let reply = order_history(state.clone(), session, json!({"limit": 5_000}))
            .await
            .unwrap();
        assert_eq!(reply["error"]["code"], "SERVICE_UNAVAILABLE");
    }

    #[test]
    fn limit_clamps_to_1000() {
        let params = json!({"limit": 5_000});
        assert_eq!(i64_or(&params, "limit", 100).min(1_000), 1_000);
    }
}
