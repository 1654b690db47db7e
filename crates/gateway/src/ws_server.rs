//! WebSocket transport endpoint.
//!
//! Binds inbound connections to sessions: the handshake inspector runs
//! against the upgrade request (before the socket exists), the session
//! store resolves the identity, and the QoS engine replays any pending
//! frames before the read loop accepts new inbound traffic.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        RawQuery, State, WebSocketUpgrade,
    },
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use tokio::sync::mpsc;
use tokio::time::interval;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::dispatcher::Dispatcher;
use crate::handshake::HandshakeInspector;
use crate::session::Session;
use crate::state::ServerState;
use protocol::Frame;

/// Everything the transport layer needs per request.
pub struct AppState {
    pub state: Arc<ServerState>,
    pub dispatcher: Arc<Dispatcher>,
    pub inspector: HandshakeInspector,
}

/// Build the HTTP router: the WebSocket endpoint plus a health probe.
pub fn create_router(app: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(app)
        .layer(CorsLayer::permissive())
}

async fn health_handler(State(app): State<Arc<AppState>>) -> impl IntoResponse {
    format!(
        r#"{{"status":"ok","sessions":{},"rooms":{}}}"#,
        app.state.sessions.session_count(),
        app.state.rooms.room_count(),
    )
}

/// Upgrade handler. Identity extraction and authorization happen here,
/// against the request metadata, so a rejected client never completes
/// the WebSocket handshake.
async fn ws_handler(
    ws: WebSocketUpgrade,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    State(app): State<Arc<AppState>>,
) -> impl IntoResponse {
    let query = query.unwrap_or_default();
    let device_header = headers.get("x-device-id").and_then(|v| v.to_str().ok());

    let identity = match app.inspector.extract(&query, device_header) {
        Ok(identity) => identity,
        Err(reason) => {
            info!(reason = %reason, "handshake rejected");
            counter!("gateway_handshake_rejected_total").increment(1);
            return (StatusCode::UNAUTHORIZED, "Trading authentication failed").into_response();
        }
    };

    if !app.inspector.authorize(&identity) {
        return (StatusCode::UNAUTHORIZED, "Trading authentication failed").into_response();
    }

    let max_message_bytes = app.state.config.max_message_bytes;
    ws.max_message_size(max_message_bytes)
        .on_upgrade(move |socket| handle_socket(socket, app, identity))
        .into_response()
}

/// Drive one connection for its lifetime.
async fn handle_socket(
    socket: WebSocket,
    app: Arc<AppState>,
    identity: crate::session::Identity,
) {
    let state = app.state.clone();
    let (session, created) = state.sessions.lookup_or_create(identity);
    let session_id = session.id.clone();

    counter!("gateway_connections_total").increment(1);
    gauge!("gateway_open_sockets").increment(1.0);
    info!(session_id = %session_id, created, "client connected");

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Outbound pump: one channel of WebSocket messages per connection.
    let (msg_tx, mut msg_rx) = mpsc::unbounded_channel::<Message>();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = msg_rx.recv().await {
            if ws_tx.send(msg).await.is_err() {
                break;
            }
        }
    });

    // Frame adapter: the QoS engine speaks raw frame bytes.
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<Bytes>();
    let adapter_msg_tx = msg_tx.clone();
    let adapter_task = tokio::spawn(async move {
        while let Some(bytes) = frame_rx.recv().await {
            if adapter_msg_tx.send(Message::Binary(bytes)).is_err() {
                break;
            }
        }
    });

    // Binding the channel replays every pending frame in msg-id order;
    // only after that do we start reading inbound frames.
    let replayed = state.qos.attach(&session_id, frame_tx.clone());
    if replayed > 0 {
        info!(session_id = %session_id, replayed, "resumed session with pending frames");
    }

    let mut ping_ticker = interval(state.config.ping_interval);
    ping_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        handle_frame(&app, &session, &frame_tx, &data);
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = msg_tx.send(Message::Pong(payload));
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Text(_))) => {
                        // The wire protocol is binary; text frames are
                        // malformed input and dropped without a reply.
                        debug!(session_id = %session_id, "text frame dropped");
                    }
                    Some(Err(e)) => {
                        warn!(session_id = %session_id, error = %e, "websocket error");
                        break;
                    }
                }
            }

            _ = ping_ticker.tick() => {
                if msg_tx.send(Message::Ping(Bytes::new())).is_err() {
                    break;
                }
            }
        }
    }

    // Disconnect: outbound state survives, the session TTL starts.
    state.qos.detach(&session_id);
    state
        .sessions
        .mark_disconnected(&session_id, ServerState::now_ms());
    send_task.abort();
    adapter_task.abort();

    counter!("gateway_disconnections_total").increment(1);
    gauge!("gateway_open_sockets").decrement(1.0);
    info!(session_id = %session_id, "client disconnected");
}

/// Decode and route one inbound binary frame.
///
/// DATA frames are ACKed before the handler runs; malformed frames are
/// dropped silently, and ACK frames settle pending deliveries.
fn handle_frame(
    app: &Arc<AppState>,
    session: &Arc<Session>,
    frame_tx: &mpsc::UnboundedSender<Bytes>,
    data: &[u8],
) {
    let frame = match protocol::decode(data) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(session_id = %session.id, error = %e, "malformed frame dropped");
            counter!("gateway_malformed_frames_total").increment(1);
            return;
        }
    };

    match frame {
        Frame::Data { msg_id, envelope } => {
            // ACK first: delivery acknowledgement is independent of
            // handler outcome.
            let _ = frame_tx.send(protocol::encode_ack(msg_id));

            let payload = envelope.payload.to_json();

            let state = app.state.clone();
            let dispatcher = app.dispatcher.clone();
            let session = session.clone();
            tokio::spawn(async move {
                dispatcher
                    .dispatch(state, session, &envelope.method, payload)
                    .await;
            });
        }
        Frame::Ack { msg_id } => {
            app.state.qos.ack(&session.id, msg_id);
        }
    }
}
