//! Shared server state handed to every handler.

use std::sync::Arc;

use history::{HistoryRepository, OrderLogWriter};
use protocol::Account;
use serde_json::{json, Value};
use tracing::warn;

use crate::alerts::{built_in_alerts, AlertEngine};
use crate::config::GatewayConfig;
use crate::idempotency::IdempotencyCache;
use crate::qos::QosEngine;
use crate::risk::{DefaultRiskValidator, RiskValidator};
use crate::rooms::RoomRegistry;
use crate::session::{Session, SessionStore};
use crate::stats::{MetricsStyle, Stats};

pub struct ServerState {
    pub config: GatewayConfig,
    pub sessions: SessionStore,
    pub rooms: RoomRegistry,
    pub qos: QosEngine,
    pub idempotency: IdempotencyCache,
    pub alerts: AlertEngine,
    pub stats: Stats,
    pub risk: Box<dyn RiskValidator>,
    pub history: Option<Arc<dyn HistoryRepository>>,
    pub order_log: Option<OrderLogWriter>,
}

impl ServerState {
    /// Assemble state from config with the default collaborators. The
    /// history backend is optional: the gateway runs without it and the
    /// `history.*` methods answer `SERVICE_UNAVAILABLE`.
    pub fn new(
        config: GatewayConfig,
        history: Option<Arc<dyn HistoryRepository>>,
        order_log: Option<OrderLogWriter>,
        metrics_style: MetricsStyle,
    ) -> Self {
        Self {
            sessions: SessionStore::new(config.session_ttl_ms),
            rooms: RoomRegistry::new(),
            qos: QosEngine::new(config.qos),
            idempotency: IdempotencyCache::new(config.idempotency_ttl_ms),
            alerts: AlertEngine::new(),
            stats: Stats::new(metrics_style),
            risk: Box::new(DefaultRiskValidator::default()),
            history,
            order_log,
            config,
        }
    }

    pub fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Serialize a reply object and enqueue it as a QoS1 DATA frame
    /// under the request's method.
    pub fn send_reply(&self, session_id: &str, method: &str, reply: &Value) {
        let body = reply.to_string();
        match protocol::envelope::encode_envelope_bytes(method, body.as_bytes(), 0) {
            Ok(envelope) => {
                self.qos.send_data(session_id, method, &envelope);
            }
            Err(e) => warn!(method, error = %e, "reply envelope encode failed"),
        }
    }

    /// The demo account derived from the session's user.
    pub fn account_for(&self, session: &Session) -> Account {
        let user_id = session
            .get_str("userId")
            .unwrap_or_else(|| "demo-user".to_string());
        Account {
            account_id: format!("ACC_{user_id}"),
            owner_user_id: user_id,
            base_currency: "USD".to_string(),
            balance: 100_000.0,
        }
    }

    /// Publish a market tick into its symbol room.
    pub fn publish_market(&self, symbol: &str, payload: &Value) -> usize {
        self.rooms.broadcast(
            &self.qos,
            &RoomRegistry::market_room(symbol),
            "market_data",
            payload,
        )
    }

    /// Push an alert notification to the alerts room.
    pub fn broadcast_alerts(&self, payload: &Value) -> usize {
        self.rooms
            .broadcast(&self.qos, RoomRegistry::alerts_room(), "alerts.push", payload)
    }

    /// Evaluate built-in thresholds and registered rules against a fresh
    /// sample; broadcast when anything fires. Called after order
    /// placements, cancellations, and error replies.
    pub fn check_and_broadcast_alerts(&self) {
        let now_ms = Self::now_ms();
        let sample = self.stats.sample(now_ms);
        let uptime_secs = self.stats.uptime_ms() as f64 / 1_000.0;

        let (mut alerts, mut firing) = built_in_alerts(&sample, uptime_secs);
        for event in self.alerts.evaluate(&sample) {
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
            self.broadcast_alerts(&json!({
                "type": "metrics_alert",
                "alerts": alerts,
                "timestamp": now_ms,
                "message": "System metrics triggered alerts",
            }));
        }
    }

    /// Tear down all per-session state for expired sessions.
    pub fn sweep_sessions(&self, now_ms: i64) -> usize {
        let expired = self.sessions.sweep(now_ms);
        for session_id in &expired {
            self.rooms.leave_all(session_id);
            self.qos.drop_session(session_id);
        }
        expired.len()
    }
}
