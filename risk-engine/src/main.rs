//! Real-time pre-trade risk engine: process entry point.
//!
//! Wires the engine, starts its background workers (batch pipeline
//! drain, circuit breaker cooldown scan, event-to-alert drain), and
//! serves Prometheus metrics over HTTP until asked to shut down.

use anyhow::Result;
use prometheus::{Encoder, TextEncoder};
use risk_engine::config::RiskEngineConfig;
use risk_engine::RiskEngine;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use warp::Filter;

const SERVICE_NAME: &str = "risk-engine";

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;
    info!("starting {} v{}", SERVICE_NAME, env!("CARGO_PKG_VERSION"));

    let config = RiskEngineConfig::load()?;
    let engine = Arc::new(RiskEngine::new(&config));

    spawn_batch_worker(&engine);
    spawn_market_data_worker(&engine);
    spawn_breaker_scanner(&engine);
    spawn_alert_drain(&engine);

    let metrics_addr: SocketAddr = format!("0.0.0.0:{}", config.metrics_port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid metrics address: {e}"))?;
    let metrics_handle = tokio::spawn(async move {
        info!("metrics endpoint listening on {}", metrics_addr);
        serve_metrics(metrics_addr).await;
    });

    shutdown_signal().await;
    info!("shutdown signal received, stopping");
    metrics_handle.abort();

    Ok(())
}

fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            format!("{}=info", SERVICE_NAME.replace('-', "_")).into()
        }))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true)
                .with_thread_ids(true)
                .with_thread_names(true),
        )
        .init();
    Ok(())
}

/// Runs the batch operation drain loop (C6) on a dedicated OS thread;
/// it blocks on channel receives and has no use for an async runtime.
fn spawn_batch_worker(engine: &Arc<RiskEngine>) {
    let engine = engine.clone();
    std::thread::Builder::new()
        .name("risk-batch-worker".to_string())
        .spawn(move || {
            let batch = engine.batch_pipeline();
            let (positions, limits) = engine.shared_stores();
            let evaluator = engine.evaluator();
            batch.run(&positions, &limits, &evaluator);
        })
        .expect("failed to spawn batch worker thread");
}

/// Drains the market data ingress queue (C4) on a dedicated OS thread.
fn spawn_market_data_worker(engine: &Arc<RiskEngine>) {
    let engine = engine.clone();
    std::thread::Builder::new()
        .name("risk-market-data-worker".to_string())
        .spawn(move || engine.run_market_data_worker())
        .expect("failed to spawn market data worker thread");
}

/// Advances circuit breakers out of `Open` once their cooldown elapses,
/// roughly once a second.
fn spawn_breaker_scanner(engine: &Arc<RiskEngine>) {
    let engine = engine.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            interval.tick().await;
            engine.scan_breaker_cooldowns();
        }
    });
}

/// Drains the event bus into the alert monitor so `Critical`/`Emergency`
/// events are logged and queryable even if no other consumer is
/// attached.
fn spawn_alert_drain(engine: &Arc<RiskEngine>) {
    let engine = engine.clone();
    std::thread::Builder::new()
        .name("risk-alert-drain".to_string())
        .spawn(move || {
            let receiver = engine.subscribe_events();
            let monitor = engine.alert_monitor();
            while let Ok(event) = receiver.recv() {
                monitor.observe(&event);
                risk_engine::metrics::set_events_dropped(engine.events_dropped() as i64);
            }
        })
        .expect("failed to spawn alert drain thread");
}

async fn serve_metrics(addr: SocketAddr) {
    let metrics_route = warp::path("metrics").map(|| {
        let encoder = TextEncoder::new();
        let metric_families = prometheus::gather();
        let mut buffer = Vec::new();
        match encoder.encode(&metric_families, &mut buffer) {
            Ok(()) => String::from_utf8(buffer).unwrap_or_else(|_| "error encoding metrics".to_string()),
            Err(_) => "error gathering metrics".to_string(),
        }
    });
    let health_route = warp::path("health").map(|| "OK");
    let routes = metrics_route.or(health_route);
    warp::serve(routes).run(addr).await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => error!("failed to install SIGTERM handler: {e}"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C"),
        () = terminate => info!("received SIGTERM"),
    }
}
