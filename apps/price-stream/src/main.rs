//! Price Stream Binary
//!
//! Watches the configured symbols through a multiplexed stream registry,
//! logs every state update, and serves health and metrics endpoints.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin price-stream
//! ```
//!
//! # Environment Variables
//!
//! - `PRICE_STREAM_BASE_URL`: Price feed server (default: <http://localhost:8000>)
//! - `PRICE_STREAM_SYMBOLS`: Comma-separated symbols (default: AAPL)
//! - `PRICE_STREAM_INTERVAL`: Sampling interval (default: 5)
//! - `PRICE_STREAM_COUNT`: Sample count, 0 = unbounded (default: 0)
//! - `PRICE_STREAM_RECONNECT_DELAY_INITIAL_MS`: First backoff delay (default: 1000)
//! - `PRICE_STREAM_RECONNECT_DELAY_MAX_SECS`: Backoff cap (default: 60)
//! - `PRICE_STREAM_RECONNECT_DELAY_MULTIPLIER`: Backoff growth (default: 1.5)
//! - `PRICE_STREAM_RECONNECT_JITTER`: Backoff jitter fraction (default: 0.0)
//! - `PRICE_STREAM_CONNECT_TIMEOUT_SECS`: HTTP connect timeout (default: 10)
//! - `PRICE_STREAM_SSE_MAX_LINE_BYTES`: Longest accepted event-stream line (default: 65536)
//! - `PRICE_STREAM_HEALTH_PORT`: Health check HTTP port (default: 8083)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;

use anyhow::Context;
use price_stream::infrastructure::telemetry;
use price_stream::{
    ConnectionState, HealthServer, HealthServerState, SseTransportFactory, StreamCapabilities,
    StreamClientConfig, StreamRegistry, Subscription, SystemClock, TokioScheduler, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting price stream client");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    let config = StreamClientConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let transports =
        SseTransportFactory::new(&config.sse).context("failed to build SSE transport")?;
    let scheduler = TokioScheduler::try_current().context("no tokio runtime for timers")?;
    let capabilities = StreamCapabilities::new(
        Arc::new(transports),
        Arc::new(scheduler),
        Arc::new(SystemClock),
    );
    let registry = StreamRegistry::new(config.registry_config(), capabilities);

    // Spawn health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        registry.clone(),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    let subscriptions: Vec<Subscription> = config
        .symbols
        .iter()
        .map(|symbol| {
            let symbol_label = symbol.clone();
            registry.subscribe(symbol, config.subscribe, move |state| {
                log_update(&symbol_label, state);
            })
        })
        .collect();

    tracing::info!(
        symbols = subscriptions.len(),
        connections = registry.connection_count(),
        "Price stream client ready"
    );

    await_shutdown(shutdown_token).await;

    drop(subscriptions);
    registry.shutdown();

    tracing::info!("Price stream client stopped");
    Ok(())
}

fn log_update(symbol: &str, state: &ConnectionState) {
    match (&state.error, state.price) {
        (Some(error), _) if !matches!(error, price_stream::ErrorTag::Fallback) => {
            tracing::warn!(
                symbol,
                error = %error,
                price = ?state.price,
                "Price stream error"
            );
        }
        (_, Some(price)) => {
            tracing::info!(
                symbol,
                price,
                fallback = state.error.is_some(),
                last_update = ?state.last_update,
                "Price update"
            );
        }
        (_, None) => {
            tracing::debug!(symbol, loading = state.is_loading, "Waiting for price");
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &StreamClientConfig) {
    tracing::info!(
        base_url = %config.base_url,
        symbols = ?config.symbols,
        interval = config.subscribe.interval,
        count = config.subscribe.count,
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        initial_delay = ?config.reconnect.initial_delay,
        max_delay = ?config.reconnect.max_delay,
        multiplier = config.reconnect.multiplier,
        jitter = config.reconnect.jitter_factor,
        "Reconnect policy"
    );
}

/// Load .env file from current directory or any ancestor directory.
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
}
