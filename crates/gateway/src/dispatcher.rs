//! Method dispatch: registry plus middleware chain.
//!
//! The registry maps method names to boxed async handlers. Before a
//! handler runs, middleware execute in registration order; any of them
//! can halt the dispatch by returning [`MiddlewareOutcome::Halt`], in
//! which case no reply frame is produced — an unauthorized caller
//! observes a timeout, never an error frame. Handler failures are caught
//! here and answered with `INTERNAL_ERROR`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use metrics::gauge;
use serde_json::Value;
use std::sync::atomic::Ordering::Relaxed;
use tracing::{debug, warn};

use crate::error::Result;
use crate::session::Session;
use crate::state::ServerState;
use protocol::response::{error_response, is_error, ErrorCode};

pub enum MiddlewareOutcome {
    Continue,
    Halt,
}

pub type Middleware =
    Box<dyn Fn(&ServerState, &Session, &str, &Value) -> MiddlewareOutcome + Send + Sync>;

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;
pub type Handler =
    Box<dyn Fn(Arc<ServerState>, Arc<Session>, Value) -> HandlerFuture + Send + Sync>;

#[derive(Default)]
pub struct Dispatcher {
    middleware: Vec<Middleware>,
    handlers: HashMap<&'static str, Handler>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn use_middleware(&mut self, middleware: Middleware) {
        self.middleware.push(middleware);
    }

    pub fn register(&mut self, method: &'static str, handler: Handler) {
        self.handlers.insert(method, handler);
    }

    /// Route one decoded request. The reply, when there is one, goes out
    /// through the session's QoS queue under the request method.
    pub async fn dispatch(
        &self,
        state: Arc<ServerState>,
        session: Arc<Session>,
        method: &str,
        payload: Value,
    ) {
        for middleware in &self.middleware {
            if let MiddlewareOutcome::Halt = middleware(&state, &session, method, &payload) {
                return;
            }
        }

        let Some(handler) = self.handlers.get(method) else {
            warn!(method, session_id = %session.id, "unknown method dropped");
            return;
        };

        let reply = match handler(state.clone(), session.clone(), payload).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(method, session_id = %session.id, error = %e, "handler failed");
                error_response(ErrorCode::InternalError, format!("{method} failed: {e}"))
            }
        };

        if is_error(&reply) {
            state.stats.record_error();
            state.check_and_broadcast_alerts();
        }

        state.send_reply(&session.id, method, &reply);
        debug!(method, session_id = %session.id, "reply enqueued");
    }
}

/// The protected method set behind the authentication gate.
fn is_protected(method: &str) -> bool {
    method.starts_with("orders.")
        || method.starts_with("history.")
        || method.starts_with("market.")
        || method.starts_with("alerts.")
        || method == "metrics.get"
}

/// Trace middleware: logs method entry and tracks the active-connection
/// counter on `hello`.
pub fn trace_middleware() -> Middleware {
    Box::new(|state, session, method, _payload| {
        debug!(method, session_id = %session.id, "request");
        if method == "hello" {
            let active = state.stats.active_connections.fetch_add(1, Relaxed) + 1;
            gauge!("gateway_active_connections").set(active as f64);
        }
        MiddlewareOutcome::Continue
    })
}

/// Authentication gate: protected methods require the session field
/// `authenticated == "true"`. Rejection is silent by design — the
/// transport layer sends nothing, and the client cannot distinguish an
/// unknown method from a forbidden one.
pub fn auth_middleware() -> Middleware {
    Box::new(|_state, session, method, _payload| {
        if !is_protected(method) {
            return MiddlewareOutcome::Continue;
        }
        match session.get_str("authenticated") {
            Some(flag) if flag == "true" => MiddlewareOutcome::Continue,
            other => {
                debug!(
                    method,
                    session_id = %session.id,
                    authenticated = ?other,
                    "auth gate rejected"
                );
                MiddlewareOutcome::Halt
            }
        }
    })
}

/// Build the production dispatcher: both middleware plus the full method
/// catalog.
pub fn build_dispatcher() -> Dispatcher {
    use crate::handlers;

    let mut d = Dispatcher::new();
    d.use_middleware(trace_middleware());
    d.use_middleware(auth_middleware());

    macro_rules! route {
        ($method:literal, $handler:path) => {
            d.register(
                $method,
                Box::new(|state, session, payload| -> HandlerFuture {
                    Box::pin($handler(state, session, payload))
                }),
            );
        };
    }

    route!("hello", handlers::auth::hello);
    route!("logout", handlers::auth::logout);
    route!("orders.place", handlers::orders::place);
    route!("orders.cancel", handlers::orders::cancel);
    route!("orders.status", handlers::orders::status);
    route!("orders.history", handlers::orders::order_history);
    route!("market.subscribe", handlers::market::subscribe);
    route!("market.unsubscribe", handlers::market::unsubscribe);
    route!("market.list", handlers::market::list);
    route!("history.query", handlers::history::query);
    route!("history.latest", handlers::history::latest);
    route!("metrics.get", handlers::system::metrics_get);
    route!("alerts.subscribe", handlers::system::alerts_subscribe);
    route!("alerts.list", handlers::system::alerts_list);
    route!("alerts.register", handlers::system::alerts_register);
    route!("alerts.disable", handlers::system::alerts_disable);

    d
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::session::{FieldValue, Identity};
    use crate::stats::MetricsStyle;

    fn test_state() -> Arc<ServerState> {
        Arc::new(ServerState::new(
            GatewayConfig::default(),
            None,
            None,
            MetricsStyle::Measured,
        ))
    }

    fn test_session(state: &ServerState) -> Arc<Session> {
        let (session, _) = state.sessions.lookup_or_create(Identity {
            client_id: "trader-1".to_string(),
            device_id: 42,
            session_token: [0u8; 16],
        });
        session
    }

    #[test]
    fn protected_set_matches_catalog() {
        for method in [
            "orders.place",
            "orders.cancel",
            "orders.status",
            "orders.history",
            "history.query",
            "history.latest",
            "market.subscribe",
            "market.unsubscribe",
            "market.list",
            "metrics.get",
            "alerts.subscribe",
            "alerts.list",
            "alerts.register",
            "alerts.disable",
        ] {
            assert!(is_protected(method), "{method} should be protected");
        }
        assert!(!is_protected("hello"));
        assert!(!is_protected("logout"));
    }

    #[tokio::test]
    async fn auth_gate_halts_unauthenticated_protected_call() {
        let state = test_state();
        let session = test_session(&state);
        let dispatcher = build_dispatcher();

        dispatcher
            .dispatch(
                state.clone(),
                session.clone(),
                "orders.status",
                serde_json::json!({}),
            )
            .await;
        // Silent short-circuit: nothing was enqueued for this session.
        assert_eq!(state.qos.pending_count(&session.id), 0);
    }

    #[tokio::test]
    async fn authenticated_protected_call_replies() {
        let state = test_state();
        let session = test_session(&state);
        session.set_field("authenticated", FieldValue::Str("true".into()), true);
        let dispatcher = build_dispatcher();

        dispatcher
            .dispatch(
                state.clone(),
                session.clone(),
                "orders.status",
                serde_json::json!({}),
            )
            .await;
        assert_eq!(state.qos.pending_count(&session.id), 1);
    }

    #[tokio::test]
    async fn unknown_method_is_dropped() {
        let state = test_state();
        let session = test_session(&state);
        let dispatcher = build_dispatcher();

        dispatcher
            .dispatch(
                state.clone(),
                session.clone(),
                "no.such.method",
                serde_json::json!({}),
            )
            .await;
        assert_eq!(state.qos.pending_count(&session.id), 0);
    }

    #[tokio::test]
    async fn hello_bumps_active_connections() {
        let state = test_state();
        let session = test_session(&state);
        let dispatcher = build_dispatcher();

        dispatcher
            .dispatch(
                state.clone(),
                session.clone(),
                "hello",
                serde_json::json!({"token": "trader", "clientId": "trader-1"}),
            )
            .await;
        assert_eq!(state.stats.active_connections.load(Relaxed), 1);
        assert_eq!(state.qos.pending_count(&session.id), 1);
    }
}
