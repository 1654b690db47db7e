//! `metrics.get` and `alerts.*`.

use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;

use rand::Rng;
use serde_json::{json, Value};

use crate::alerts::built_in_alerts;
use crate::error::Result;
use crate::rooms::RoomRegistry;
use crate::session::Session;
use crate::state::ServerState;
use crate::stats::MetricsStyle;
use protocol::response::{error_response, ErrorCode};
use protocol::AlertRule;

use super::{f64_or, str_or};

/// Compose the metrics snapshot: the nested `systemPerformance` object
/// plus flat fallback fields older clients read.
pub async fn metrics_get(
    state: Arc<ServerState>,
    _session: Arc<Session>,
    _params: Value,
) -> Result<Value> {
    let now_ms = ServerState::now_ms();
    let uptime_ms = state.stats.uptime_ms();
    let sample = state.stats.sample(now_ms);

    let total_orders = state.stats.total_orders_placed.load(Relaxed);
    let total_cancels = state.stats.total_orders_cancelled.load(Relaxed);
    let total_errors = state.stats.total_errors.load(Relaxed);

    let p95_factor = match state.stats.style() {
        MetricsStyle::Measured => 2.0,
        MetricsStyle::Synthetic => 1.5 + rand::thread_rng().gen_range(0.0..1.0),
    };
    let p95 = sample.latency_ms * p95_factor;

    let system_performance = json!({
        "latency": {
            "avg": round2(sample.latency_ms),
            "p95": round2(p95),
            "unit": "ms",
        },
        "throughput": {
            "value": round2(sample.throughput),
            "unit": "tx/s",
            "period": "1m avg.",
        },
        "errorRate": {
            "value": round2(sample.error_rate * 100.0),
            "unit": "%",
            "period": "Last 5 min",
        },
        "connectionCount": {
            "value": sample.conn_count,
            "status": "active",
        },
        "totalOrders": {
            "value": total_orders,
            "period": "lifetime",
        },
        "cancelled": {
            "value": total_cancels,
            "period": "total",
        },
        "errors": {
            "value": total_errors,
            "period": "total",
        },
        "activeSessions": {
            "value": sample.conn_count,
            "status": "current",
        },
    });

    Ok(json!({
        "ts": now_ms,
        "uptimeMs": uptime_ms,
        "systemPerformance": system_performance,
        "latencyMs": sample.latency_ms,
        "throughput": sample.throughput,
        "errorRate": sample.error_rate,
        "totalOrders": total_orders,
        "totalCancels": total_cancels,
        "totalErrors": total_errors,
        "connCount": sample.conn_count,
        "activeSessions": sample.conn_count,
    }))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Join the system alerts room.
pub async fn alerts_subscribe(
    state: Arc<ServerState>,
    session: Arc<Session>,
    _params: Value,
) -> Result<Value> {
    let room = RoomRegistry::alerts_room();
    state.rooms.join(room, &session.id);
    Ok(json!({
        "room": room,
        "message": "Successfully subscribed to alerts",
    }))
}

/// Evaluate built-in thresholds and registered rules; broadcast when
/// anything is firing.
pub async fn alerts_list(
    state: Arc<ServerState>,
    _session: Arc<Session>,
    _params: Value,
) -> Result<Value> {
    let now_ms = ServerState::now_ms();
    let sample = state.stats.sample(now_ms);
    let uptime_secs = state.stats.uptime_ms() as f64 / 1_000.0;

    let (mut alerts, mut firing) = built_in_alerts(&sample, uptime_secs);
    let events = state.alerts.evaluate(&sample);
    for event in &events {
        firing = true;
        alerts[format!("custom_rule_{}", event.rule_id)] = json!({
            "status": "alert",
            "ruleId": event.rule_id,
            "current": event.value,
            "message": event.message,
            "timestamp": event.ts,
        });
    }

    if firing {
        state.broadcast_alerts(&json!({
            "type": "alert_status_change",
            "alerts": alerts,
            "timestamp": now_ms,
            "message": "System alert status changed",
        }));
    }

    Ok(json!({
        "alerts": alerts,
        "alertEvents": events,
        "timestamp": now_ms,
        "message": "Real-time system alerts with current metrics",
    }))
}

/// Insert a rule into the rule table.
pub async fn alerts_register(
    state: Arc<ServerState>,
    _session: Arc<Session>,
    params: Value,
) -> Result<Value> {
    let rule_id = str_or(&params, "ruleId", "");
    let metric_key = str_or(&params, "metricKey", "");
    let operator = str_or(&params, "operator", "");
    let threshold = f64_or(&params, "threshold", 0.0);
    let enabled = params
        .get("enabled")
        .and_then(Value::as_bool)
        .unwrap_or(true);

    if rule_id.is_empty() || metric_key.is_empty() || operator.is_empty() {
        return Ok(error_response(
            ErrorCode::InvalidParams,
            "Missing required parameters: ruleId, metricKey, operator",
        ));
    }

    state.alerts.register(AlertRule {
        rule_id: rule_id.clone(),
        metric_key: metric_key.clone(),
        operator: operator.clone(),
        threshold,
        enabled,
    });

    Ok(json!({
        "ruleId": rule_id,
        "metricKey": metric_key,
        "operator": operator,
        "threshold": threshold,
        "enabled": enabled,
        "message": "Alert rule registered successfully",
    }))
}

/// Disable a rule, keeping the record.
pub async fn alerts_disable(
    state: Arc<ServerState>,
    _session: Arc<Session>,
    params: Value,
) -> Result<Value> {
    let rule_id = str_or(&params, "ruleId", "");
    if rule_id.is_empty() {
        return Ok(error_response(
            ErrorCode::InvalidParams,
            "Missing required parameter: ruleId",
        ));
    }

    state.alerts.disable(&rule_id);

    Ok(json!({
        "ruleId": rule_id,
        "message": "Alert rule disabled successfully",
    }))
}
