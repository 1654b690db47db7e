//! Alert rules and threshold evaluation.
//!
//! Two layers: a fixed set of built-in system thresholds, and a mutable
//! rule table clients manage through `alerts.register` / `alerts.disable`.
//! Crossings broadcast to the `alerts:system` room.

use std::collections::HashMap;
use std::sync::Mutex;

use protocol::{AlertEvent, AlertRule, MetricsSample};
use serde_json::{json, Value};
use tracing::info;

pub struct AlertEngine {
    rules: Mutex<HashMap<String, AlertRule>>,
}

impl AlertEngine {
    pub fn new() -> Self {
        Self {
            rules: Mutex::new(HashMap::new()),
        }
    }

    /// Insert or replace a rule, keyed by rule id.
    pub fn register(&self, rule: AlertRule) {
        info!(rule_id = %rule.rule_id, metric = %rule.metric_key, threshold = rule.threshold, "alert rule registered");
        let mut rules = self.rules.lock().expect("alert rules lock poisoned");
        rules.insert(rule.rule_id.clone(), rule);
    }

    /// Disable a rule, retaining the record. Returns false when unknown.
    pub fn disable(&self, rule_id: &str) -> bool {
        let mut rules = self.rules.lock().expect("alert rules lock poisoned");
        match rules.get_mut(rule_id) {
            Some(rule) => {
                rule.enabled = false;
                info!(rule_id, "alert rule disabled");
                true
            }
            None => false,
        }
    }

    /// Evaluate every enabled rule against a sample.
    pub fn evaluate(&self, sample: &MetricsSample) -> Vec<AlertEvent> {
        let rules = self.rules.lock().expect("alert rules lock poisoned");
        let mut events = Vec::new();

        for rule in rules.values().filter(|r| r.enabled) {
            let (value, label) = match rule.metric_key.as_str() {
                "latencyMs" => (sample.latency_ms, "latency"),
                "throughput" => (sample.throughput, "throughput"),
                "errorRate" => (sample.error_rate, "error rate"),
                "connCount" => (sample.conn_count as f64, "connection count"),
                _ => continue,
            };

            let triggered = match rule.operator.as_str() {
                ">" => value > rule.threshold,
                ">=" => value >= rule.threshold,
                "<" => value < rule.threshold,
                "<=" => value <= rule.threshold,
                "==" => value == rule.threshold,
                _ => false,
            };

            if triggered {
                events.push(AlertEvent {
                    event_id: format!("{}_{}", rule.rule_id, sample.ts),
                    rule_id: rule.rule_id.clone(),
                    ts: sample.ts,
                    value,
                    message: format!(
                        "{label} {} {} (current: {value})",
                        rule.operator, rule.threshold
                    ),
                });
            }
        }

        events
    }
}

impl Default for AlertEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Built-in system thresholds, evaluated alongside registered rules.
/// Returns the per-alert status map and whether anything is firing.
pub fn built_in_alerts(sample: &MetricsSample, uptime_secs: f64) -> (Value, bool) {
    let latency_alert = sample.latency_ms > 100.0;
    let error_alert = sample.error_rate > 0.01;
    let conn_alert = sample.conn_count > 1_000;
    let low_tput_warning = sample.throughput < 10.0 && uptime_secs > 60.0;
    let high_tput_alert = sample.throughput > 2.0;

    let alerts = json!({
        "high_latency": {
            "threshold": 100.0,
            "current": sample.latency_ms,
            "status": if latency_alert { "alert" } else { "ok" },
            "message": if latency_alert {
                format!("High latency detected: {:.0}ms", sample.latency_ms)
            } else {
                format!("Latency normal: {:.0}ms", sample.latency_ms)
            },
        },
        "error_rate": {
            "threshold": 0.01,
            "current": sample.error_rate,
            "status": if error_alert { "alert" } else { "ok" },
            "message": if error_alert {
                format!("High error rate: {:.2}%", sample.error_rate * 100.0)
            } else {
                format!("Error rate normal: {:.2}%", sample.error_rate * 100.0)
            },
        },
        "connection_count": {
            "threshold": 1000,
            "current": sample.conn_count,
            "status": if conn_alert { "alert" } else { "ok" },
            "message": if conn_alert {
                format!("High connection count: {}", sample.conn_count)
            } else {
                format!("Connection count normal: {}", sample.conn_count)
            },
        },
        "low_throughput": {
            "threshold": 10.0,
            "current": sample.throughput,
            "status": if low_tput_warning { "warning" } else { "ok" },
            "message": if low_tput_warning {
                format!("Low throughput: {:.1} orders/sec", sample.throughput)
            } else {
                format!("Throughput normal: {:.1} orders/sec", sample.throughput)
            },
        },
        "high_throughput": {
            "threshold": 2.0,
            "current": sample.throughput,
            "status": if high_tput_alert { "alert" } else { "ok" },
            "message": if high_tput_alert {
                format!("High throughput detected: {:.1} orders/sec", sample.throughput)
            } else {
                format!("Throughput normal: {:.1} orders/sec", sample.throughput)
            },
        },
    });

    let firing = latency_alert || error_alert || conn_alert || low_tput_warning || high_tput_alert;
    (alerts, firing)
}
