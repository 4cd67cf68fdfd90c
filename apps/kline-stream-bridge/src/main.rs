//! Kline Stream Bridge Binary
//!
//! Connects both tick feeds, subscribes the configured watchlist and logs
//! every bar it produces.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin kline-stream-bridge
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `ALLTICK_API_TOKEN`: Feed access token
//!
//! ## Optional
//! - `BRIDGE_WATCHLIST`: `CODE@class[:res,res];...` (default: empty)
//! - `BRIDGE_HEALTH_PORT`: Health check HTTP port (default: 8083)
//! - `BRIDGE_HEARTBEAT_INTERVAL_SECS`: Keep-alive period (default: 10)
//! - `BRIDGE_LIVENESS_TIMEOUT_SECS`: Silence before reconnecting, 0 disables (default: 0)
//! - `BRIDGE_UNSUBSCRIBE_POLICY`: always | last_reference (default: always)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: Span collector; setting it enables export
//! - `OTEL_ENABLED`: Force span export on or off (default: follows the endpoint)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use kline_stream_bridge::application::ports::MAX_HISTORY_BARS;
use kline_stream_bridge::application::services::{ChartFeed, FeedChannel};
use kline_stream_bridge::domain::instrument::{FeedClass, InstrumentCatalog};
use kline_stream_bridge::domain::streaming::Bar;
use kline_stream_bridge::domain::subscription::BarCallback;
use kline_stream_bridge::infrastructure::config::{BridgeConfig, WatchEntry};
use kline_stream_bridge::infrastructure::feed::{FeedConnectionConfig, FeedRuntime, spawn_feed};
use kline_stream_bridge::infrastructure::health::{HealthServer, HealthServerState};
use kline_stream_bridge::infrastructure::history::KlineHistoryClient;
use kline_stream_bridge::infrastructure::telemetry;
use kline_stream_bridge::init_metrics;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Kline Stream Bridge");

    let _metrics_handle = init_metrics();

    let config = BridgeConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let equity = spawn_feed(
        feed_config(&config, FeedClass::Equity),
        config.feed.event_capacity,
        &shutdown_token,
    );
    let generic = spawn_feed(
        feed_config(&config, FeedClass::Generic),
        config.feed.event_capacity,
        &shutdown_token,
    );

    let history = KlineHistoryClient::new(config.token.clone(), &config.endpoints, &config.history)
        .context("failed to build history client")?;

    let catalog = InstrumentCatalog::new(config.watchlist.iter().map(|e| e.instrument.clone()));
    let chart = Arc::new(ChartFeed::new(
        catalog,
        FeedChannel::new(Arc::clone(&equity.registry), equity.connection.clone()),
        FeedChannel::new(Arc::clone(&generic.registry), generic.connection.clone()),
        Arc::new(history),
        config.feed.unsubscribe_policy,
    ));

    subscribe_watchlist(&chart, &config.watchlist);

    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        vec![
            (FeedClass::Equity, Arc::clone(&equity.connection)),
            (FeedClass::Generic, Arc::clone(&generic.connection)),
        ],
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    let health_task = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    tracing::info!("Kline bridge ready");

    await_shutdown(shutdown_token).await;

    let drain = async {
        for runtime in [equity, generic] {
            stop_feed(runtime).await;
        }
        let _ = health_task.await;
    };
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, drain).await.is_err() {
        tracing::warn!("Shutdown timed out");
    }

    tracing::info!("Kline bridge stopped");
    Ok(())
}

fn feed_config(config: &BridgeConfig, feed: FeedClass) -> FeedConnectionConfig {
    let mut connection = FeedConnectionConfig::new(
        feed,
        config.endpoints.ws_for(feed),
        config.token.clone(),
    );
    connection.backoff = config.feed.backoff();
    connection.heartbeat = config.feed.heartbeat();
    connection.outbound_capacity = config.feed.outbound_capacity;
    connection
}

/// Subscribe every watchlist entry and backfill each once in the background.
fn subscribe_watchlist(chart: &Arc<ChartFeed>, watchlist: &[WatchEntry]) {
    for entry in watchlist {
        let code = entry.instrument.ticker.clone();
        for &resolution in &entry.resolutions {
            let bar_code = code.clone();
            let callback: BarCallback = Arc::new(move |bar: &Bar| log_bar(&bar_code, bar));

            if let Err(e) = chart.subscribe(&code, resolution, callback) {
                tracing::warn!(code = %code, %resolution, error = %e, "Watchlist subscribe failed");
                continue;
            }

            let chart = Arc::clone(chart);
            let code = code.clone();
            tokio::spawn(async move {
                match chart.fetch_history(&code, resolution, 0, MAX_HISTORY_BARS).await {
                    Ok(result) => tracing::info!(
                        code = %code,
                        %resolution,
                        bars = result.bars().len(),
                        no_data = result.is_no_data(),
                        "Backfill complete"
                    ),
                    Err(e) => tracing::warn!(code = %code, %resolution, error = %e, "Backfill failed"),
                }
            });
        }
    }
}

fn log_bar(code: &str, bar: &Bar) {
    tracing::debug!(
        code,
        time = bar.time,
        open = %bar.open,
        high = %bar.high,
        low = %bar.low,
        close = %bar.close,
        volume = %bar.volume,
        "Bar"
    );
}

async fn stop_feed(runtime: FeedRuntime) {
    let feed = runtime.connection.feed();
    match runtime.connection_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(%feed, error = %e, "Feed connection error"),
        Err(e) => tracing::error!(%feed, error = %e, "Feed connection task panicked"),
    }
    let _ = runtime.router_task.await;
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &BridgeConfig) {
    tracing::info!(
        health_port = config.server.health_port,
        heartbeat_secs = config.feed.heartbeat_interval.as_secs(),
        unsubscribe_policy = config.feed.unsubscribe_policy.as_str(),
        watchlist = config.watchlist.len(),
        token = ?config.token,
        "Configuration loaded"
    );
    tracing::debug!(
        equity_ws = %config.endpoints.equity_ws,
        generic_ws = %config.endpoints.generic_ws,
        "Feed endpoints"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
