//! Process-wide counters and the metrics snapshot behind `metrics.get`.
//!
//! Hot-path counters are bare atomics; a snapshot composes them into the
//! client-facing metrics sample. Latency and throughput are synthesized
//! with bounded perturbation by default so the alert path has live data
//! to chew on; `MetricsStyle::Measured` turns the noise off for
//! deterministic tests and for deployments that wire in real probes.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering::Relaxed};
use std::time::Instant;

use protocol::MetricsSample;
use rand::Rng;

/// How the latency/throughput figures in a sample are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricsStyle {
    /// Bounded random perturbation on top of the measured base.
    Synthetic,
    /// Raw counter-derived values, no noise.
    Measured,
}

pub struct Stats {
    pub total_orders_placed: AtomicI64,
    pub total_orders_cancelled: AtomicI64,
    pub total_errors: AtomicI64,
    pub active_connections: AtomicI64,
    pub delivery_failed: AtomicU64,
    start_time: Instant,
    style: MetricsStyle,
}

impl Stats {
    pub fn new(style: MetricsStyle) -> Self {
        Self {
            total_orders_placed: AtomicI64::new(0),
            total_orders_cancelled: AtomicI64::new(0),
            total_errors: AtomicI64::new(0),
            active_connections: AtomicI64::new(0),
            delivery_failed: AtomicU64::new(0),
            start_time: Instant::now(),
            style,
        }
    }

    pub fn uptime_ms(&self) -> i64 {
        self.start_time.elapsed().as_millis() as i64
    }

    pub fn style(&self) -> MetricsStyle {
        self.style
    }

    pub fn record_error(&self) {
        self.total_errors.fetch_add(1, Relaxed);
        metrics::counter!("gateway_errors_total").increment(1);
    }

    /// Compose a point-in-time sample for `metrics.get` and alert
    /// evaluation.
    pub fn sample(&self, now_ms: i64) -> MetricsSample {
        let uptime_secs = self.uptime_ms() as f64 / 1_000.0;
        let orders = self.total_orders_placed.load(Relaxed);
        let cancels = self.total_orders_cancelled.load(Relaxed);
        let errors = self.total_errors.load(Relaxed);
        let connections = self.active_connections.load(Relaxed);

        let operations = orders + cancels;
        let error_rate = if operations > 0 {
            errors as f64 / operations as f64
        } else {
            0.0
        };

        let real_throughput = if uptime_secs > 0.0 {
            orders as f64 / uptime_secs
        } else {
            0.0
        };

        let (latency_ms, throughput, conn_count) = match self.style {
            MetricsStyle::Measured => (
                (0.5 + error_rate * 25.0).clamp(0.5, 50.0),
                real_throughput,
                connections,
            ),
            MetricsStyle::Synthetic => {
                let mut rng = rand::thread_rng();
                let latency = (0.5 + error_rate * 25.0 + rng.gen_range(0.0..2.0))
                    .clamp(0.5, 50.0);
                let throughput = real_throughput + rng.gen_range(0.0..10.0);
                let conns = connections + rng.gen_range(50..550);
                (latency, throughput, conns)
            }
        };

        MetricsSample {
            ts: now_ms,
            latency_ms,
            throughput,
            error_rate,
            conn_count,
        }
    }
}
