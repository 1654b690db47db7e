//! Simulated market data publisher.
//!
//! A single task ticks once a second and publishes one tick per symbol
//! into that symbol's room. Prices random-walk around fixed bases with
//! per-symbol volatility; every tick carries a globally monotonic `seq`
//! so clients can reorder after a reconnect.

use std::sync::Arc;

use rand::Rng;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info};

use crate::state::ServerState;

/// Symbol universe with base price, volatility, and volume profile.
const SYMBOLS: [SymbolProfile; 8] = [
    SymbolProfile { symbol: "ETH-USD", base_price: 2_500.0, volatility: 0.003, base_volume: 30_000, volume_spread: 15_000 },
    SymbolProfile { symbol: "BTC-USD", base_price: 45_000.0, volatility: 0.002, base_volume: 50_000, volume_spread: 20_000 },
    SymbolProfile { symbol: "ADA-USD", base_price: 0.45, volatility: 0.004, base_volume: 10_000, volume_spread: 5_000 },
    SymbolProfile { symbol: "SOL-USD", base_price: 95.0, volatility: 0.004, base_volume: 10_000, volume_spread: 5_000 },
    SymbolProfile { symbol: "DOGE-USD", base_price: 0.08, volatility: 0.005, base_volume: 80_000, volume_spread: 30_000 },
    SymbolProfile { symbol: "AVAX-USD", base_price: 25.0, volatility: 0.004, base_volume: 15_000, volume_spread: 8_000 },
    SymbolProfile { symbol: "MATIC-USD", base_price: 0.75, volatility: 0.005, base_volume: 25_000, volume_spread: 12_000 },
    SymbolProfile { symbol: "LINK-USD", base_price: 12.5, volatility: 0.003, base_volume: 20_000, volume_spread: 10_000 },
];

struct SymbolProfile {
    symbol: &'static str,
    base_price: f64,
    volatility: f64,
    base_volume: i64,
    volume_spread: i64,
}

/// Run the simulator until the shutdown channel closes.
pub async fn run(state: Arc<ServerState>, mut shutdown_rx: mpsc::Receiver<()>) {
    info!("market data simulator started");
    let mut ticker = interval(Duration::from_secs(1));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut seq: i64 = 0;

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.recv() => {
                info!("market data simulator stopped");
                return;
            }

            _ = ticker.tick() => {
                publish_round(&state, &mut seq);
            }
        }
    }
}

/// Publish one tick per symbol.
fn publish_round(state: &ServerState, seq: &mut i64) {
    let now_ms = ServerState::now_ms();
    let mut rng = rand::thread_rng();

    for profile in &SYMBOLS {
        let change = rng.gen_range(-profile.volatility..profile.volatility);
        let mut price = profile.base_price * (1.0 + change);
        if !price.is_finite() || price <= 0.0 {
            price = profile.base_price;
        }
        let change_percent = (price - profile.base_price) / profile.base_price * 100.0;

        let volume = (profile.base_volume
            + rng.gen_range(-profile.volume_spread..=profile.volume_spread))
        .max(1_000);

        *seq += 1;
        let tick = json!({
            "symbol": profile.symbol,
            "price": price,
            "change": change_percent,
            "volume": volume,
            "seq": *seq,
            "timestamp": now_ms,
        });

        let delivered = state.publish_market(profile.symbol, &tick);
        if delivered > 0 {
            debug!(symbol = profile.symbol, delivered, seq = *seq, "tick published");
        }
    }
}
