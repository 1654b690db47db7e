//! Background order-log writer.
//!
//! Handlers enqueue log entries and return immediately; a single drain
//! task owns the repository round-trips. A failed append triggers one
//! reconnect followed by one retry, after which the entry is dropped with
//! a log line. Persistence misses never surface to the client.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::HistoryRepository;

/// One queued order-log append.
#[derive(Debug, Clone)]
pub struct OrderLogEntry {
    pub idempotency_key: String,
    pub status: String,
    pub order_id: String,
    pub result_json: String,
}

/// Handle used by handlers to enqueue appends.
#[derive(Clone)]
pub struct OrderLogWriter {
    tx: mpsc::UnboundedSender<OrderLogEntry>,
}

impl OrderLogWriter {
    /// Spawn the drain task over `repository`.
    pub fn spawn(repository: Arc<dyn HistoryRepository>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(drain(repository, rx));
        (Self { tx }, handle)
    }

    /// Enqueue an entry. Returns false when the drain task is gone.
    pub fn enqueue(&self, entry: OrderLogEntry) -> bool {
        self.tx.send(entry).is_ok()
    }
}

async fn drain(
    repository: Arc<dyn HistoryRepository>,
    mut rx: mpsc::UnboundedReceiver<OrderLogEntry>,
) {
    while let Some(entry) = rx.recv().await {
        let ok = append(&*repository, &entry).await;
        if !ok {
            // One reconnect, one retry, then give up on this entry.
            if repository.reconnect().await.is_ok() && append(&*repository, &entry).await {
                info!(order_id = %entry.order_id, "order log retry succeeded after reconnect");
            } else {
                warn!(order_id = %entry.order_id, "order log entry dropped after retry");
            }
        }
    }
}

async fn append(repository: &dyn HistoryRepository, entry: &OrderLogEntry) -> bool {
    match repository
        .append_order_log(
            &entry.idempotency_key,
            &entry.status,
            &entry.order_id,
            &entry.result_json,
        )
        .await
    {
        Ok(true) => true,
        Ok(false) => false,
        Err(e) => {
            warn!(order_id = %entry.order_id, error = %e, "order log append failed");
            false
        }
    }
}
