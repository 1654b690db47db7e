//! `history.*`: candle queries against the external repository.

use std::sync::Arc;

use history::CandleQuery;
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::error::Result;
use crate::session::Session;
use crate::state::ServerState;
use protocol::response::{error_response, ErrorCode};
use protocol::Interval;

use super::{i64_or, str_or, KNOWN_SYMBOLS};

/// Candle range query. Client timestamps are milliseconds; the
/// repository takes seconds.
pub async fn query(
    state: Arc<ServerState>,
    _session: Arc<Session>,
    params: Value,
) -> Result<Value> {
    let symbol = str_or(&params, "symbol", "");
    let from_ts = i64_or(&params, "fromTs", 0) / 1_000;
    let to_ts = i64_or(&params, "toTs", 0) / 1_000;
    let interval = Interval::parse(&str_or(&params, "interval", "M1"));
    let limit = i64_or(&params, "limit", 1_000);

    if symbol.is_empty() || from_ts == 0 || to_ts == 0 {
        return Ok(error_response(
            ErrorCode::InvalidParams,
            "Missing required parameters: symbol, fromTs, toTs",
        ));
    }

    let Some(repo) = &state.history else {
        return Ok(error_response(
            ErrorCode::ServiceUnavailable,
            "History repository not initialized",
        ));
    };

    let candle_query = CandleQuery {
        from_ts,
        to_ts,
        interval,
        limit,
    };
    let candles = match repo.fetch(&symbol, candle_query).await {
        Ok(candles) => candles,
        Err(e) => {
            warn!(%symbol, error = %e, "history query failed");
            return Ok(error_response(
                ErrorCode::QueryFailed,
                format!("Failed to fetch historical data: {e}"),
            ));
        }
    };

    let rows: Vec<Value> = candles
        .iter()
        .map(|c| {
            json!({
                "openTime": c.open_time,
                "open": c.open,
                "high": c.high,
                "low": c.low,
                "close": c.close,
                "volume": c.volume,
                "interval": interval.as_str(),
            })
        })
        .collect();

    Ok(json!({
        "symbol": symbol,
        "count": rows.len(),
        "candles": rows,
        "fromTs": from_ts,
        "toTs": to_ts,
        "interval": interval.as_str(),
    }))
}

/// Latest close per known symbol.
pub async fn latest(
    state: Arc<ServerState>,
    _session: Arc<Session>,
    _params: Value,
) -> Result<Value> {
    let Some(repo) = &state.history else {
        return Ok(error_response(
            ErrorCode::ServiceUnavailable,
            "History repository not initialized",
        ));
    };

    let symbols: Vec<String> = KNOWN_SYMBOLS.iter().map(|s| s.to_string()).collect();
    let candles = match repo.latest(&symbols, symbols.len() as i64).await {
        Ok(candles) => candles,
        Err(e) => {
            warn!(error = %e, "latest prices query failed");
            return Ok(error_response(
                ErrorCode::QueryFailed,
                format!("Failed to fetch latest prices: {e}"),
            ));
        }
    };

    let mut prices = Map::new();
    for candle in &candles {
        prices.insert(candle.symbol.clone(), json!(candle.close));
    }

    if prices.is_empty() {
        return Ok(error_response(
            ErrorCode::NoData,
            "No historical data available",
        ));
    }

    Ok(json!({
        "latest": prices,
        "timestamp": ServerState::now_ms(),
        "source": "ClickHouse",
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::handlers::testutil;
    use crate::state::ServerState;
    use crate::stats::MetricsStyle;
    use async_trait::async_trait;
    use history::{HistoryError, HistoryRepository, OrderLogRecord};
    use protocol::Candle;

    /// Canned repository for handler tests.
    struct FakeRepo {
        candles: Vec<Candle>,
        fail: bool,
    }

    #[async_trait]
    impl HistoryRepository for FakeRepo {
        async fn fetch(&self, symbol: &str, query: CandleQuery) -> history::Result<Vec<Candle>> {
            if self.fail {
                return Err(HistoryError::Backend("down".into()));
            }
            assert!(query.from_ts > 0);
            Ok(self
                .candles
                .iter()
                .filter(|c| c.symbol == symbol)
                .cloned()
                .collect())
        }

        async fn latest(&self, symbols: &[String], _limit: i64) -> history::Result<Vec<Candle>> {
            if self.fail {
                return Err(HistoryError::Backend("down".into()));
            }
            Ok(self
                .candles
                .iter()
                .filter(|c| symbols.contains(&c.symbol))
                .cloned()
                .collect())
        }

        async fn append_order_log(
            &self,
            _key: &str,
            _status: &str,
            _order_id: &str,
            _result_json: &str,
        ) -> history::Result<bool> {
            Ok(true)
        }

        async fn order_history(
            &self,
            _from: Option<i64>,
            _to: Option<i64>,
            _limit: i64,
        ) -> history::Result<Vec<OrderLogRecord>> {
            Ok(Vec::new())
        }

        async fn order_details(&self, _order_id: &str) -> history::Result<Option<OrderLogRecord>> {
            Ok(None)
        }

        async fn reconnect(&self) -> history::Result<()> {
            Ok(())
        }
    }

    fn state_with_repo(fail: bool) -> Arc<ServerState> {
        let candles = vec![Candle {
            symbol: "BTC-USD".to_string(),
            open_time: 1_700_000_000,
            open: 45_000.0,
            high: 45_100.0,
            low: 44_900.0,
            close: 45_050.0,
            volume: 1_000,
        }];
        Arc::new(ServerState::new(
            GatewayConfig::default(),
            Some(Arc::new(FakeRepo { candles, fail })),
            None,
            MetricsStyle::Measured,
        ))
    }

    #[tokio::test]
    async fn query_converts_millis_and_returns_candles() {
        let state = state_with_repo(false);
        let session = testutil::authed_session(&state, "trader-1");
        let reply = query(
            state.clone(),
            session,
            json!({
                "symbol": "BTC-USD",
                "fromTs": 1_700_000_000_000i64,
                "toTs": 1_700_003_600_000i64,
                "interval": "M1",
                "limit": 100,
            }),
        )
        .await
        .unwrap();

        assert_eq!(reply["count"], 1);
        assert_eq!(reply["fromTs"], 1_700_000_000);
        assert_eq!(reply["candles"][0]["close"], 45_050.0);
        assert_eq!(reply["candles"][0]["interval"], "M1");
    }

    #[tokio::test]
    async fn query_rejects_zero_timestamps() {
        let state = state_with_repo(false);
        let session = testutil::authed_session(&state, "trader-1");
        for params in [
            json!({"symbol": "BTC-USD", "fromTs": 0, "toTs": 1_700_003_600_000i64}),
            json!({"symbol": "BTC-USD", "fromTs": 1_700_000_000_000i64, "toTs": 0}),
            json!({"symbol": "", "fromTs": 1_700_000_000_000i64, "toTs": 1_700_003_600_000i64}),
        ] {
            let reply = query(state.clone(), session.clone(), params).await.unwrap();
            assert_eq!(reply["error"]["code"], "INVALID_PARAMS");
        }
    }

    #[tokio::test]
    async fn query_maps_backend_failure() {
        let state = state_with_repo(true);
        let session = testutil::authed_session(&state, "trader-1");
        let reply = query(
            state.clone(),
            session,
            json!({"symbol": "BTC-USD", "fromTs": 1_700_000_000_000i64, "toTs": 1_700_003_600_000i64}),
        )
        .await
        .unwrap();
        assert_eq!(reply["error"]["code"], "QUERY_FAILED");
    }

    #[tokio::test]
    async fn query_without_backend_is_unavailable() {
        let state = testutil::state();
        let session = testutil::authed_session(&state, "trader-1");
        let reply = query(
            state.clone(),
            session,
            json!({"symbol": "BTC-USD", "fromTs": 1_700_000_000_000i64, "toTs": 1_700_003_600_000i64}),
        )
        .await
        .unwrap();
        assert_eq!(reply["error"]["code"], "SERVICE_UNAVAILABLE");
    }

    #[tokio::test]
    async fn latest_maps_symbol_to_close() {
        let state = state_with_repo(false);
        let session = testutil::authed_session(&state, "trader-1");
        let reply = latest(state.clone(), session, json!({})).await.unwrap();
        assert_eq!(reply["latest"]["BTC-USD"], 45_050.0);
        assert_eq!(reply["source"], "ClickHouse");
    }

    #[tokio::test]
    async fn latest_with_no_rows_is_no_data() {
        let state = Arc::new(ServerState::new(
            GatewayConfig::default(),
            Some(Arc::new(FakeRepo {
                candles: Vec::new(),
                fail: false,
            })),
            None,
            MetricsStyle::Measured,
        ));
        let session = testutil::authed_session(&state, "trader-1");
        let reply = latest(state.clone(), session, json!({})).await.unwrap();
        assert_eq!(reply["error"]["code"], "NO_DATA");
    }
}
