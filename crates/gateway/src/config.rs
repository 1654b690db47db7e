//! Gateway configuration.
//!
//! Defaults are overridden by environment variables, and the positional
//! CLI arguments `[port] [host]` win over both.

use std::env;
use std::time::Duration;

/// QoS1 retransmission settings.
#[derive(Debug, Clone, Copy)]
pub struct QosConfig {
    /// Delay before the first retransmission, and the backoff step.
    pub base_retry_ms: u64,
    /// Retransmission attempts before a pending message is dropped.
    pub max_retry: u32,
    /// Backoff ceiling.
    pub max_backoff_ms: u64,
}

impl Default for QosConfig {
    fn default() -> Self {
        Self {
            base_retry_ms: 100,
            max_retry: 5,
            max_backoff_ms: 2_000,
        }
    }
}

impl QosConfig {
    /// Linear backoff: `min(base * (n + 1), max)`.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let ms = self
            .base_retry_ms
            .saturating_mul(u64::from(attempts) + 1)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub metrics_port: u16,
    pub jwt_secret: String,
    pub ping_interval: Duration,
    pub max_message_bytes: usize,
    pub qos: QosConfig,
    pub session_ttl_ms: i64,
    pub idempotency_ttl_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8082,
            metrics_port: 9093,
            jwt_secret: "advanced-bull-trading-secret-key-2025".to_string(),
            ping_interval: Duration::from_secs(30),
            max_message_bytes: 5 * 1024 * 1024,
            qos: QosConfig::default(),
            session_ttl_ms: 30_000,
            idempotency_ttl_ms: 300_000,
        }
    }
}

impl GatewayConfig {
    /// Environment overrides on top of the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(host) = env::var("GATEWAY_HOST") {
            config.host = host;
        }
        if let Some(port) = parse_env("GATEWAY_PORT") {
            config.port = port;
        }
        if let Some(port) = parse_env("METRICS_PORT") {
            config.metrics_port = port;
        }
        if let Ok(secret) = env::var("GATEWAY_JWT_SECRET") {
            config.jwt_secret = secret;
        }
        config
    }

    /// Apply positional CLI arguments `[port] [host]`.
    ///
    /// A non-numeric port is an error; the reference binary exits with
    /// status 1 in that case.
    pub fn apply_args<I: IntoIterator<Item = String>>(
        mut self,
        args: I,
    ) -> std::result::Result<Self, String> {
        let mut args = args.into_iter();
        if let Some(port) = args.next() {
            self.port = port
                .parse()
                .map_err(|_| format!("invalid port number: {port}"))?;
        }
        if let Some(host) = args.next() {
            self.host = host;
        }
        Ok(self)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}
