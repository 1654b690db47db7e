//! Domain vocabulary shared across the gateway and its collaborators.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("SELL") {
            Side::Sell
        } else {
            Side::Buy
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Market,
    Limit,
}

impl OrderType {
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("MARKET") {
            OrderType::Market
        } else {
            OrderType::Limit
        }
    }
}

/// Order lifecycle states. The numeric discriminants flow into client
/// responses as plain integers, so their order is part of the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    New = 0,
    Ack = 1,
    PartiallyFilled = 2,
    Filled = 3,
    Rejected = 4,
    Canceled = 5,
}

impl OrderStatus {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Ack => "ACK",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Canceled => "CANCELLED",
        }
    }
}

/// Candle aggregation interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interval {
    S1,
    S5,
    S15,
    M1,
    M5,
    M15,
    H1,
    D1,
}

impl Interval {
    /// Parse the client-facing interval name; unknown values fall back to
    /// one-minute candles, matching the reference server.
    pub fn parse(s: &str) -> Self {
        match s {
            "S1" => Interval::S1,
            "S5" => Interval::S5,
            "S15" => Interval::S15,
            "M5" => Interval::M5,
            "M15" => Interval::M15,
            "H1" => Interval::H1,
            "D1" => Interval::D1,
            _ => Interval::M1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Interval::S1 => "S1",
            Interval::S5 => "S5",
            Interval::S15 => "S15",
            Interval::M1 => "M1",
            Interval::M5 => "M5",
            Interval::M15 => "M15",
            Interval::H1 => "H1",
            Interval::D1 => "D1",
        }
    }

    pub fn seconds(self) -> i64 {
        match self {
            Interval::S1 => 1,
            Interval::S5 => 5,
            Interval::S15 => 15,
            Interval::M1 => 60,
            Interval::M5 => 300,
            Interval::M15 => 900,
            Interval::H1 => 3_600,
            Interval::D1 => 86_400,
        }
    }
}

/// An OHLCV aggregate over one interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    #[serde(rename = "openTime")]
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

/// A trading account as seen by the risk validator.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub account_id: String,
    pub owner_user_id: String,
    pub base_currency: String,
    pub balance: f64,
}

/// An open position held by an account.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub symbol: String,
    pub qty: f64,
    pub avg_price: f64,
}

/// An order as submitted for validation.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub order_id: String,
    pub idempotency_key: String,
    pub symbol: String,
    pub order_type: OrderType,
    pub side: Side,
    pub qty: f64,
    pub price: f64,
}

/// The computed outcome of an order placement, as bound to its idempotency
/// key. Replays of the same key return the same outcome verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    pub status: OrderStatus,
    pub order_id: String,
    pub echo_key: String,
    pub reason: String,
}

impl OrderResult {
    pub fn new(status: OrderStatus, order_id: impl Into<String>, echo_key: impl Into<String>) -> Self {
        Self {
            status,
            order_id: order_id.into(),
            echo_key: echo_key.into(),
            reason: String::new(),
        }
    }

    pub fn rejected(
        order_id: impl Into<String>,
        echo_key: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            status: OrderStatus::Rejected,
            order_id: order_id.into(),
            echo_key: echo_key.into(),
            reason: reason.into(),
        }
    }
}

/// A point-in-time metrics sample used for alert evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsSample {
    pub ts: i64,
    pub latency_ms: f64,
    pub throughput: f64,
    pub error_rate: f64,
    pub conn_count: i64,
}

/// A client-registered alert rule over one metric key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    #[serde(rename = "ruleId")]
    pub rule_id: String,
    #[serde(rename = "metricKey")]
    pub metric_key: String,
    pub operator: String,
    pub threshold: f64,
    pub enabled: bool,
}

/// A rule firing at a specific sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEvent {
    #[serde(rename = "eventId")]
    pub event_id: String,
    #[serde(rename = "ruleId")]
    pub rule_id: String,
    pub ts: i64,
    pub value: f64,
    pub message: String,
}
