//! ClickHouse-backed history repository over the HTTP interface.
//!
//! Queries are plain SQL POSTed to the HTTP port with `FORMAT JSON`;
//! numeric columns may come back as strings (ClickHouse renders UInt64
//! that way), so row parsing is lenient about both encodings.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use protocol::Candle;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{CandleQuery, HistoryError, HistoryRepository, OrderLogRecord, Result};

/// Connection settings, normally read from the environment.
#[derive(Debug, Clone)]
pub struct ClickHouseConfig {
    pub host: String,
    pub http_port: u16,
    pub database: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            http_port: 8123,
            database: "trading".to_string(),
            user: None,
            password: None,
        }
    }
}

impl ClickHouseConfig {
    /// Read `CLICKHOUSE_*` variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("CLICKHOUSE_HOST").unwrap_or(defaults.host),
            http_port: std::env::var("CLICKHOUSE_HTTP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .or_else(|| {
                    // CLICKHOUSE_PORT names the native protocol port; it
                    // only stands in for the HTTP port when it plainly
                    // is not the native default.
                    std::env::var("CLICKHOUSE_PORT")
                        .ok()
                        .and_then(|p| p.parse().ok())
                        .filter(|p: &u16| *p != 9000)
                })
                .unwrap_or(defaults.http_port),
            database: std::env::var("CLICKHOUSE_DATABASE").unwrap_or(defaults.database),
            user: std::env::var("CLICKHOUSE_USER").ok().filter(|s| !s.is_empty()),
            password: std::env::var("CLICKHOUSE_PASSWORD")
                .ok()
                .filter(|s| !s.is_empty()),
        }
    }
}

pub struct ClickHouseRepository {
    config: ClickHouseConfig,
    client: reqwest::Client,
    connected: AtomicBool,
}

impl ClickHouseRepository {
    pub fn new(config: ClickHouseConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            config,
            client,
            connected: AtomicBool::new(false),
        }
    }

    /// Build a repository from the environment and verify connectivity.
    pub async fn connect_from_env() -> Result<Self> {
        let repo = Self::new(ClickHouseConfig::from_env());
        repo.ping().await?;
        repo.create_tables().await?;
        Ok(repo)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn base_url(&self) -> String {
        format!("http://{}:{}", self.config.host, self.config.http_port)
    }

    /// Ping the HTTP endpoint; flips the connected flag.
    pub async fn ping(&self) -> Result<()> {
        let resp = self.client.get(self.base_url()).send().await?;
        let ok = resp.status().is_success();
        self.connected.store(ok, Ordering::Relaxed);
        if ok {
            Ok(())
        } else {
            Err(HistoryError::Backend(format!(
                "ping returned {}",
                resp.status()
            )))
        }
    }

    /// Execute one SQL statement and return the raw response body.
    async fn execute(&self, sql: String) -> Result<String> {
        debug!(sql = %sql, "clickhouse query");
        let mut req = self.client.post(self.base_url()).body(sql);
        if let Some(user) = &self.config.user {
            req = req.header("X-ClickHouse-User", user);
        }
        if let Some(password) = &self.config.password {
            req = req.header("X-ClickHouse-Key", password);
        }
        let resp = req.send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            self.connected.store(false, Ordering::Relaxed);
            return Err(HistoryError::Backend(format!("{status}: {body}")));
        }
        Ok(body)
    }

    /// Execute a `FORMAT JSON` query and return its data rows.
    async fn query_rows(&self, sql: String) -> Result<Vec<Value>> {
        let body = self.execute(sql).await?;
        let parsed: Value = serde_json::from_str(&body)
            .map_err(|e| HistoryError::Decode(format!("bad JSON body: {e}")))?;
        match parsed.get("data").and_then(Value::as_array) {
            Some(rows) => Ok(rows.clone()),
            None => Err(HistoryError::Decode("response missing data array".into())),
        }
    }

    /// Create the database, candle table, and order log if absent.
    pub async fn create_tables(&self) -> Result<()> {
        let db = &self.config.database;
        self.execute(format!("CREATE DATABASE IF NOT EXISTS {db}"))
            .await?;

        self.execute(format!(
            "CREATE TABLE IF NOT EXISTS {db}.candles_1m (\
                symbol String, open_time DateTime, open Float64, high Float64, \
                low Float64, close Float64, volume UInt64\
            ) ENGINE = MergeTree() \
            ORDER BY (symbol, open_time) \
            PARTITION BY toYYYYMMDD(open_time) \
            TTL open_time + INTERVAL 180 DAY"
        ))
        .await?;

        self.execute(format!(
            "CREATE TABLE IF NOT EXISTS {db}.orders_log (\
                idemp_key String, ts DateTime, status String, \
                order_id String, result String\
            ) ENGINE = MergeTree() \
            ORDER BY (idemp_key, ts) \
            PARTITION BY toYYYYMMDD(ts)"
        ))
        .await?;

        info!(database = %db, "clickhouse tables ready");
        Ok(())
    }
}

/// Escape a string literal for interpolation into SQL.
fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Format a unix-seconds timestamp as a ClickHouse DateTime literal.
fn format_ts(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "1970-01-01 00:00:00".to_string())
}

fn row_i64(row: &Value, key: &str) -> i64 {
    match row.get(key) {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

fn row_f64(row: &Value, key: &str) -> f64 {
    match row.get(key) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn row_str(row: &Value, key: &str) -> String {
    row.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn row_to_candle(row: &Value, symbol: &str) -> Candle {
    Candle {
        symbol: if symbol.is_empty() {
            row_str(row, "symbol")
        } else {
            symbol.to_string()
        },
        open_time: row_i64(row, "open_time"),
        open: row_f64(row, "open"),
        high: row_f64(row, "high"),
        low: row_f64(row, "low"),
        close: row_f64(row, "close"),
        volume: row_i64(row, "volume").max(0) as u64,
    }
}

fn row_to_order_log(row: &Value) -> OrderLogRecord {
    OrderLogRecord {
        idempotency_key: row_str(row, "idemp_key"),
        status: row_str(row, "status"),
        order_id: row_str(row, "order_id"),
        result_json: row_str(row, "result"),
        created_at: row_i64(row, "ts"),
    }
}

#[async_trait]
impl HistoryRepository for ClickHouseRepository {
    async fn fetch(&self, symbol: &str, query: CandleQuery) -> Result<Vec<Candle>> {
        let db = &self.config.database;
        let sql = format!(
            "SELECT toUnixTimestamp(open_time) AS open_time, open, high, low, close, volume \
             FROM {db}.candles_1m \
             WHERE symbol = '{}' AND open_time >= '{}' AND open_time <= '{}' \
             ORDER BY open_time DESC LIMIT {} FORMAT JSON",
            escape(symbol),
            format_ts(query.from_ts),
            format_ts(query.to_ts),
            query.limit.clamp(1, 10_000),
        );
        let rows = self.query_rows(sql).await?;
        Ok(rows.iter().map(|r| row_to_candle(r, symbol)).collect())
    }

    async fn latest(&self, symbols: &[String], limit: i64) -> Result<Vec<Candle>> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }
        let db = &self.config.database;
        let list = symbols
            .iter()
            .map(|s| format!("'{}'", escape(s)))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT symbol, toUnixTimestamp(open_time) AS open_time, open, high, low, close, volume \
             FROM {db}.candles_1m \
             WHERE symbol IN ({list}) \
             ORDER BY open_time DESC LIMIT 1 BY symbol LIMIT {} FORMAT JSON",
            limit.clamp(1, 1_000),
        );
        let rows = self.query_rows(sql).await?;
        Ok(rows.iter().map(|r| row_to_candle(r, "")).collect())
    }

    async fn append_order_log(
        &self,
        idempotency_key: &str,
        status: &str,
        order_id: &str,
        result_json: &str,
    ) -> Result<bool> {
        let db = &self.config.database;
        let sql = format!(
            "INSERT INTO {db}.orders_log VALUES ('{}', now(), '{}', '{}', '{}')",
            escape(idempotency_key),
            escape(status),
            escape(order_id),
            escape(result_json),
        );
        match self.execute(sql).await {
            Ok(_) => Ok(true),
            Err(HistoryError::Backend(msg)) => {
                warn!(order_id, error = %msg, "order log insert rejected");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn order_history(
        &self,
        from_time: Option<i64>,
        to_time: Option<i64>,
        limit: i64,
    ) -> Result<Vec<OrderLogRecord>> {
        let db = &self.config.database;
        let mut conditions = Vec::new();
        if let Some(from) = from_time {
            conditions.push(format!("ts >= '{}'", format_ts(from)));
        }
        if let Some(to) = to_time {
            conditions.push(format!("ts <= '{}'", format_ts(to)));
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {} ", conditions.join(" AND "))
        };
        let sql = format!(
            "SELECT idemp_key, toUnixTimestamp(ts) AS ts, status, order_id, result \
             FROM {db}.orders_log {where_clause}\
             ORDER BY ts DESC LIMIT {} FORMAT JSON",
            limit.clamp(1, 1_000),
        );
        let rows = self.query_rows(sql).await?;
        Ok(rows.iter().map(row_to_order_log).collect())
    }

    async fn order_details(&self, order_id: &str) -> Result<Option<OrderLogRecord>> {
        let db = &self.config.database;
        let sql = format!(
            "SELECT idemp_key, toUnixTimestamp(ts) AS ts, status, order_id, result \
             FROM {db}.orders_log WHERE order_id = '{}' \
             ORDER BY ts DESC LIMIT 1 FORMAT JSON",
            escape(order_id),
        );
        let rows = self.query_rows(sql).await?;
        Ok(rows.first().map(row_to_order_log))
    }

    async fn reconnect(&self) -> Result<()> {
        info!("reconnecting to clickhouse");
        self.ping().await
    }
}
