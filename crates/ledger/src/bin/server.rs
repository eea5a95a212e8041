//! AIGOS-Ledger Server
//!
//! HTTP server for governance event ingestion and query.
//!
//! Environment:
//! - `AIGOS_BIND_ADDR` (default `0.0.0.0`) / `PORT` (default `3020`)
//! - `AIGOS_API_TOKENS`: `token:org[,token:org...]`
//! - `AIGOS_RATE_LIMIT` / `AIGOS_RATE_WINDOW_SECS`
//! - `AIGOS_RATE_CRITICAL_EXEMPT` (default `true`)
//! - `AIGOS_MAX_BATCH` (default `1000`)
//! - `AIGOS_MERKLE_WINDOW` (leaves, default `1000`) /
//!   `AIGOS_MERKLE_WINDOW_SECS` (default `300`)

use std::sync::Arc;

use anyhow::Context;
use chrono::Duration;
use parking_lot::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use aigos_ledger::{
    router, AppState, CheckpointSealer, IngestPolicy, LedgerConfig, MemoryEventStore,
    RateLimitConfig, RateLimiter, SealerConfig, StaticTokenMap,
};

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let tokens = std::env::var("AIGOS_API_TOKENS").unwrap_or_default();
    let resolver = StaticTokenMap::from_env_value(&tokens);
    if resolver.is_empty() {
        tracing::warn!("AIGOS_API_TOKENS is empty; every authenticated route will reject");
    }

    let state = Arc::new(AppState {
        store: Arc::new(MemoryEventStore::new()),
        resolver: Arc::new(resolver),
        limiter: RateLimiter::new(RateLimitConfig {
            limit: env_or("AIGOS_RATE_LIMIT", 120),
            window: Duration::seconds(env_or("AIGOS_RATE_WINDOW_SECS", 60)),
            critical_exempt: env_or("AIGOS_RATE_CRITICAL_EXEMPT", true),
        }),
        sealer: Mutex::new(CheckpointSealer::new(SealerConfig {
            max_leaves: env_or("AIGOS_MERKLE_WINDOW", 1_000),
            max_window: Duration::seconds(env_or("AIGOS_MERKLE_WINDOW_SECS", 300)),
        })),
        ingest_policy: IngestPolicy::default(),
        config: LedgerConfig {
            max_batch: env_or("AIGOS_MAX_BATCH", 1_000),
        },
    });

    let host = std::env::var("AIGOS_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = std::env::var("PORT").unwrap_or_else(|_| "3020".to_string());
    let addr = format!("{host}:{port}");

    tracing::info!(%addr, "AIGOS ledger server listening");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received; draining");
        })
        .await
        .context("serving ledger")?;
    Ok(())
}
