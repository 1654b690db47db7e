//! Trading gateway entry point.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use gateway::{
    build_dispatcher, create_router, market_feed, spawn_maintenance, AppState, GatewayConfig,
    HandshakeInspector, MetricsStyle, ServerState,
};
use history::{ClickHouseRepository, HistoryRepository, OrderLogWriter};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("gateway failed: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = GatewayConfig::from_env()
        .apply_args(std::env::args().skip(1))
        .map_err(|e| anyhow::anyhow!(e))?;

    info!("Starting trading gateway");
    info!("  host: {}", config.host);
    info!("  port: {}", config.port);
    info!("  metrics port: {}", config.metrics_port);
    info!("  session ttl: {}ms", config.session_ttl_ms);
    info!(
        "  qos: base {}ms, max {} retries, backoff cap {}ms",
        config.qos.base_retry_ms, config.qos.max_retry, config.qos.max_backoff_ms
    );

    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], config.metrics_port))
        .install()?;
    info!("Prometheus exporter on port {}", config.metrics_port);

    // The history backend is optional: without ClickHouse the gateway
    // still trades, and history methods answer SERVICE_UNAVAILABLE.
    let (history_repo, order_log): (Option<Arc<dyn HistoryRepository>>, Option<OrderLogWriter>) =
        match ClickHouseRepository::connect_from_env().await {
            Ok(repo) => {
                info!("ClickHouse history repository connected");
                let repo: Arc<dyn HistoryRepository> = Arc::new(repo);
                let (writer, _drain) = OrderLogWriter::spawn(repo.clone());
                (Some(repo), Some(writer))
            }
            Err(e) => {
                warn!("ClickHouse unavailable, history disabled: {e}");
                (None, None)
            }
        };

    let state = Arc::new(ServerState::new(
        config.clone(),
        history_repo,
        order_log,
        MetricsStyle::Synthetic,
    ));

    let maintenance = spawn_maintenance(state.clone());

    let (feed_shutdown_tx, feed_shutdown_rx) = mpsc::channel(1);
    let feed_task = tokio::spawn(market_feed::run(state.clone(), feed_shutdown_rx));

    let app = Arc::new(AppState {
        state: state.clone(),
        dispatcher: Arc::new(build_dispatcher()),
        inspector: HandshakeInspector::new(config.jwt_secret.clone()),
    });
    let router = create_router(app);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("Gateway listening on {addr}");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    let _ = feed_shutdown_tx.send(()).await;
    let _ = feed_task.await;
    for task in maintenance {
        task.abort();
    }

    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received terminate signal"),
    }
}
