//! QoS1 (at-least-once) outbound delivery engine.
//!
//! Every DATA frame leaving the server is tracked per session: it gets a
//! monotonically increasing 64-bit message id, sits in the session's
//! pending map until the client ACKs it, and is retransmitted
//! byte-identical on a linear backoff schedule. Reconnecting clients get
//! the full pending queue replayed in message-id order before anything
//! new is sent.
//!
//! The engine owns pending queues and retry state only; sockets hand it a
//! plain byte channel on attach and take it back on disconnect. Inbound
//! duplicate suppression is not handled here — reconnecting clients reuse
//! ids without cross-process monotonicity, so dedup belongs to the
//! idempotency layer.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use bytes::Bytes;
use dashmap::DashMap;
use metrics::counter;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::config::QosConfig;
use protocol::frame;

/// Channel end the socket layer hands to the engine. Frames flow through
/// as raw bytes; the socket wraps them into WebSocket binary messages.
pub type FrameSender = mpsc::UnboundedSender<Bytes>;

#[derive(Debug)]
struct Pending {
    method: String,
    bytes: Bytes,
    first_sent_at: Instant,
    attempts: u32,
    next_retry_at: Instant,
}

#[derive(Debug, Default)]
struct QueueInner {
    /// Next outbound message id. Ids start at 1 and never repeat within a
    /// session's lifetime.
    next_msg_id: u64,
    /// Unacked messages, keyed by id. BTreeMap keeps replay ordered.
    pending: BTreeMap<u64, Pending>,
    sender: Option<FrameSender>,
}

/// Per-session outbound queue.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    inner: Mutex<QueueInner>,
}

/// Result of one retry sweep.
#[derive(Debug, Default, PartialEq)]
pub struct RetrySweep {
    pub resent: usize,
    pub dropped: usize,
}

pub struct QosEngine {
    queues: DashMap<String, Arc<OutboundQueue>>,
    config: QosConfig,
}

impl QosEngine {
    pub fn new(config: QosConfig) -> Self {
        Self {
            queues: DashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &QosConfig {
        &self.config
    }

    fn queue(&self, session_id: &str) -> Arc<OutboundQueue> {
        self.queues
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }

    /// Send a DATA frame carrying an already-encoded envelope.
    ///
    /// The message id is assigned and the frame is pushed under the same
    /// lock, so two concurrent sends cannot cross on the wire out of id
    /// order. Returns the assigned id.
    pub fn send_data(&self, session_id: &str, method: &str, envelope_bytes: &[u8]) -> u64 {
        let queue = self.queue(session_id);
        let now = Instant::now();
        let mut inner = queue.inner.lock().expect("qos lock poisoned");

        inner.next_msg_id += 1;
        let msg_id = inner.next_msg_id;
        let bytes = frame::encode_data_raw(msg_id, envelope_bytes);

        inner.pending.insert(
            msg_id,
            Pending {
                method: method.to_string(),
                bytes: bytes.clone(),
                first_sent_at: now,
                attempts: 0,
                next_retry_at: now + self.config.backoff(0),
            },
        );

        let send_failed = inner
            .sender
            .as_ref()
            .is_some_and(|sender| sender.send(bytes).is_err());
        if send_failed {
            // Connection is tearing down; the frame stays pending and
            // will be replayed on the next attach.
            inner.sender = None;
        }

        trace!(session_id, method, msg_id, "data frame enqueued");
        msg_id
    }

    /// Process an inbound ACK. Returns true when it matched a pending entry.
    pub fn ack(&self, session_id: &str, msg_id: u64) -> bool {
        let Some(queue) = self.queues.get(session_id).map(|e| e.value().clone()) else {
            return false;
        };
        let mut inner = queue.inner.lock().expect("qos lock poisoned");
        let removed = inner.pending.remove(&msg_id).is_some();
        if removed {
            trace!(session_id, msg_id, "ack matched pending");
        } else {
            debug!(session_id, msg_id, "ack for unknown message");
        }
        removed
    }

    /// Bind a connection's outbound channel and replay every pending
    /// frame in message-id order. Returns the replay count; the caller
    /// must not read inbound frames until this has completed.
    pub fn attach(&self, session_id: &str, sender: FrameSender) -> usize {
        let queue = self.queue(session_id);
        let mut inner = queue.inner.lock().expect("qos lock poisoned");

        let mut replayed = 0;
        for pending in inner.pending.values() {
            if sender.send(pending.bytes.clone()).is_err() {
                warn!(session_id, "replay aborted: connection already gone");
                return replayed;
            }
            replayed += 1;
        }
        inner.sender = Some(sender);

        if replayed > 0 {
            debug!(session_id, replayed, "pending frames replayed on resume");
            counter!("gateway_qos_replayed_total").increment(replayed as u64);
        }
        replayed
    }

    /// Drop the outbound channel on disconnect. Pending state survives
    /// until ACK, retry exhaustion, or session expiry.
    pub fn detach(&self, session_id: &str) {
        if let Some(queue) = self.queues.get(session_id) {
            let mut inner = queue.inner.lock().expect("qos lock poisoned");
            inner.sender = None;
        }
    }

    /// Discard all delivery state for an expired session.
    pub fn drop_session(&self, session_id: &str) {
        if let Some((_, queue)) = self.queues.remove(session_id) {
            let inner = queue.inner.lock().expect("qos lock poisoned");
            if !inner.pending.is_empty() {
                debug!(
                    session_id,
                    pending = inner.pending.len(),
                    "pending discarded with expired session"
                );
            }
        }
    }

    pub fn pending_count(&self, session_id: &str) -> usize {
        self.queues
            .get(session_id)
            .map(|q| q.inner.lock().expect("qos lock poisoned").pending.len())
            .unwrap_or(0)
    }

    /// One pass of the retry timer.
    ///
    /// Due entries on attached sessions are retransmitted with the same
    /// bytes (same message id) and pushed onto the backoff schedule; an
    /// entry that has exhausted its attempts is dropped and counted as a
    /// delivery failure — no frame tells the client. Detached sessions
    /// are skipped: their pending frames replay on reattach, and session
    /// TTL bounds how long they can linger.
    pub fn sweep_retries(&self, now: Instant) -> RetrySweep {
        let mut sweep = RetrySweep::default();

        for entry in self.queues.iter() {
            let session_id = entry.key().as_str();
            let mut inner = entry.value().inner.lock().expect("qos lock poisoned");

            let due: Vec<u64> = inner
                .pending
                .iter()
                .filter(|(_, p)| p.next_retry_at <= now)
                .map(|(id, _)| *id)
                .collect();

            for msg_id in due {
                let exhausted = inner
                    .pending
                    .get(&msg_id)
                    .is_some_and(|p| p.attempts >= self.config.max_retry);

                if exhausted {
                    if let Some(p) = inner.pending.remove(&msg_id) {
                        warn!(
                            session_id,
                            msg_id,
                            method = %p.method,
                            age_ms = p.first_sent_at.elapsed().as_millis() as u64,
                            "delivery failed: retries exhausted"
                        );
                        counter!("gateway_qos_delivery_failed_total").increment(1);
                        sweep.dropped += 1;
                    }
                    continue;
                }

                let Some(sender) = inner.sender.clone() else {
                    continue;
                };
                let send_failed = match inner.pending.get_mut(&msg_id) {
                    Some(p) => {
                        if sender.send(p.bytes.clone()).is_err() {
                            true
                        } else {
                            p.attempts += 1;
                            p.next_retry_at = now + self.config.backoff(p.attempts);
                            counter!("gateway_qos_retransmits_total").increment(1);
                            sweep.resent += 1;
                            false
                        }
                    }
                    None => false,
                };
                if send_failed {
                    inner.sender = None;
                    break;
                }
            }
        }

        sweep
    }
}
