//! Historical data bridge.
//!
//! The gateway consumes two things from a history backend: candle queries
//! for `history.*` methods and an append-only order log used as the audit
//! trail behind `orders.*`. Both are expressed through the
//! [`HistoryRepository`] trait; the shipped implementation speaks the
//! ClickHouse HTTP interface.
//!
//! Order-log appends are latency-insensitive and must never fail a client
//! reply, so they flow through [`writer::OrderLogWriter`], a background
//! task draining a channel while handlers move on.

pub mod clickhouse;
pub mod writer;

use async_trait::async_trait;
use protocol::{Candle, Interval};

pub use clickhouse::{ClickHouseConfig, ClickHouseRepository};
pub use writer::{OrderLogEntry, OrderLogWriter};

/// Errors from the history backend.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("decode error: {0}")]
    Decode(String),
}

pub type Result<T> = std::result::Result<T, HistoryError>;

/// Parameters for a candle range query. Timestamps are seconds; the
/// gateway converts from client-facing milliseconds before delegating.
#[derive(Debug, Clone, Copy)]
pub struct CandleQuery {
    pub from_ts: i64,
    pub to_ts: i64,
    pub interval: Interval,
    pub limit: i64,
}

/// One persisted order-log row.
#[derive(Debug, Clone)]
pub struct OrderLogRecord {
    pub idempotency_key: String,
    pub status: String,
    pub order_id: String,
    pub result_json: String,
    pub created_at: i64,
}

/// Contract the gateway holds against any history backend.
#[async_trait]
pub trait HistoryRepository: Send + Sync {
    /// Fetch candles for one symbol over a closed time range.
    async fn fetch(&self, symbol: &str, query: CandleQuery) -> Result<Vec<Candle>>;

    /// Latest candle per symbol, at most `limit` rows overall.
    async fn latest(&self, symbols: &[String], limit: i64) -> Result<Vec<Candle>>;

    /// Append one row to the order log. Returns `Ok(false)` when the
    /// backend rejected the write without a transport fault.
    async fn append_order_log(
        &self,
        idempotency_key: &str,
        status: &str,
        order_id: &str,
        result_json: &str,
    ) -> Result<bool>;

    /// Recent order-log rows, newest first.
    async fn order_history(
        &self,
        from_time: Option<i64>,
        to_time: Option<i64>,
        limit: i64,
    ) -> Result<Vec<OrderLogRecord>>;

    /// Look up the most recent log row for one order id.
    async fn order_details(&self, order_id: &str) -> Result<Option<OrderLogRecord>>;

    /// Re-establish the backend connection after a failed write.
    async fn reconnect(&self) -> Result<()>;
}
