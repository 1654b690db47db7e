//! Real-time trading gateway.
//!
//! A single-process server terminating persistent binary WebSocket
//! connections: it authenticates clients at the handshake, multiplexes
//! request/response calls with at-least-once delivery for order
//! operations, fans live market ticks out to per-symbol rooms, and
//! bridges to a columnar store for history queries and the audit log.
//!
//! ## Architecture
//!
//! ```text
//! bytes → frame codec → QoS engine (ack/dedup) → dispatcher
//!       → handler → session fields / rooms / idempotency cache
//!       → reply → QoS engine (msg id, retry) → frame codec → bytes
//! ```
//!
//! The market feed pushes `symbol → payload` into the room registry,
//! which walks a membership snapshot and enqueues one QoS-tracked frame
//! per subscriber.
//!
//! ## Reliability model
//!
//! Outbound frames carry session-scoped monotonic message ids and are
//! retransmitted on a linear backoff until ACKed or exhausted. Sessions
//! survive disconnects for a bounded TTL, replaying unacked frames on
//! resume. Order placement is bound to client idempotency keys so
//! at-least-once transport yields at-most-once order effects.

pub mod alerts;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod handshake;
pub mod idempotency;
pub mod market_feed;
pub mod qos;
pub mod risk;
pub mod rooms;
pub mod session;
pub mod state;
pub mod stats;
pub mod ws_server;

pub use config::{GatewayConfig, QosConfig};
pub use dispatcher::{build_dispatcher, Dispatcher};
pub use error::{GatewayError, Result};
pub use handshake::HandshakeInspector;
pub use session::{FieldValue, Identity, Session, SessionStore};
pub use state::ServerState;
pub use stats::MetricsStyle;
pub use ws_server::{create_router, AppState};

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

/// Spawn the background maintenance tasks: the QoS retry ticker and the
/// session/idempotency sweeper. Tasks run until aborted.
pub fn spawn_maintenance(state: Arc<ServerState>) -> Vec<JoinHandle<()>> {
    let retry_state = state.clone();
    let retry_tick = Duration::from_millis(state.config.qos.base_retry_ms.max(2) / 2);
    let retry_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(retry_tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let sweep = retry_state.qos.sweep_retries(std::time::Instant::now());
            if sweep.dropped > 0 {
                retry_state
                    .stats
                    .delivery_failed
                    .fetch_add(sweep.dropped as u64, std::sync::atomic::Ordering::Relaxed);
            }
        }
    });

    let sweep_state = state.clone();
    let sweep_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut idempotency_countdown = 30u32;
        loop {
            ticker.tick().await;
            let expired = sweep_state.sweep_sessions(ServerState::now_ms());
            if expired > 0 {
                debug!(expired, "sessions expired");
            }
            // The idempotency cache needs far less attention.
            idempotency_countdown -= 1;
            if idempotency_countdown == 0 {
                idempotency_countdown = 30;
                sweep_state.idempotency.sweep();
            }
        }
    });

    vec![retry_task, sweep_task]
}
