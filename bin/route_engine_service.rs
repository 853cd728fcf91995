//! # Route Engine Service
//!
//! Standalone service that loads protocol and pool snapshots, runs the route engine's
//! precomputation loop and reports health periodically.
//!
//! ## Overview
//!
//! This service:
//! - Loads settings from `RouteEngine.toml` and `ROUTE_ENGINE__*` environment variables
//! - Reads protocol descriptors and liquidity pools from JSON snapshot files
//! - Precomputes routes on `precompute.interval_seconds`
//! - Logs system health every `--health-interval` seconds
//! - Optionally writes engine events to a JSON Lines file
//! - Handles graceful shutdown on Ctrl+C
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin route_engine_service -- \
//!     --protocols data/protocols.json --pools data/pools.json --chains ethereum,arbitrum
//! ```

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use dex_route_engine::{
    analytics::HealthStatus,
    events::{event_log_writer, EventRecorder},
    settings::Settings,
    types::{GasPrice, LiquidityPool, Protocol},
    RouteEngine,
};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tokio::time::{interval, Duration};

#[derive(Parser, Debug)]
#[command(name = "route_engine_service", about = "Precomputed DEX route engine")]
struct Args {
    /// JSON array of protocol descriptors
    #[arg(long)]
    protocols: PathBuf,

    /// JSON array of liquidity pools
    #[arg(long)]
    pools: PathBuf,

    /// Chains to precompute (comma separated); defaults to every chain in the pool snapshot
    #[arg(long, value_delimiter = ',')]
    chains: Vec<String>,

    /// Settings file used instead of `RouteEngine.toml`
    #[arg(long)]
    config: Option<PathBuf>,

    /// Seconds between health reports
    #[arg(long, default_value_t = 30)]
    health_interval: u64,

    /// Static gas price in gwei applied to every chain
    #[arg(long, default_value_t = 0)]
    gas_price_gwei: u64,

    /// Write engine events to this JSON Lines file (`auto` picks a timestamped name under logs/)
    #[arg(long)]
    event_log: Option<String>,

    /// Prometheus listen address, e.g. 0.0.0.0:9000
    #[cfg(feature = "observability")]
    #[arg(long)]
    metrics_addr: Option<std::net::SocketAddr>,
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    #[cfg(feature = "observability")]
    tracing_subscriber::fmt().with_target(false).init();
    #[cfg(not(feature = "observability"))]
    env_logger::init();

    let args = Args::parse();
    info!("🚀 Starting Route Engine Service");

    // 1. Settings
    let settings = match &args.config {
        Some(path) => Settings::from_file(path)?,
        None => Settings::new()?,
    };
    info!("✅ Settings loaded");

    #[cfg(feature = "observability")]
    if let Some(addr) = args.metrics_addr {
        dex_route_engine::metrics::install_prometheus_exporter(addr)?;
        info!("✅ Prometheus exporter listening on {}", addr);
    }

    // 2. Snapshots
    let protocols: Vec<Protocol> = read_json(&args.protocols)?;
    let pools: Vec<LiquidityPool> = read_json(&args.pools)?;
    info!(
        "✅ Loaded {} protocols and {} pools",
        protocols.len(),
        pools.len()
    );

    let mut chains = args.chains.clone();
    if chains.is_empty() {
        chains = pools.iter().map(|p| p.chain.clone()).collect();
        chains.sort();
        chains.dedup();
    }

    // 3. Event log
    let mut engine = RouteEngine::with_static_gas_prices(settings.clone())?;
    let mut event_writer = None;
    if let Some(target) = &args.event_log {
        let output_file = if target == "auto" {
            format!("logs/route_engine_events_{}.jsonl", Utc::now().format("%Y%m%d_%H%M%S"))
        } else {
            target.clone()
        };
        let (recorder, event_rx) = EventRecorder::new();
        let file = output_file.clone();
        // spawn the writer before any event can be recorded
        event_writer = Some(tokio::spawn(async move {
            match event_log_writer(event_rx, file).await {
                Ok(n) => info!("✅ Event log writer finished ({} events)", n),
                Err(e) => error!("❌ Event log writer error: {:#}", e),
            }
        }));
        engine = engine.with_event_recorder(Arc::new(recorder));
        info!("✅ Writing engine events to {}", output_file);
    }

    // 4. Engine
    for chain in &chains {
        engine.set_gas_price(chain, GasPrice::from_gwei(args.gas_price_gwei));
    }
    for protocol in &protocols {
        engine.upsert_protocol(protocol.clone());
    }
    // snapshot reserves count as current when they are loaded
    let loaded_at = dex_route_engine::utils::now_millis();
    let mut rejected = 0usize;
    for mut pool in pools {
        pool.last_updated_ms = loaded_at;
        if let Err(e) = engine.upsert_pool(pool) {
            rejected += 1;
            warn!("⚠️ Skipping pool: {}", e);
        }
    }
    if rejected > 0 {
        warn!("⚠️ {} pools rejected", rejected);
    }

    engine.initialize(protocols, chains.clone()).await?;

    info!("📊 Service Configuration:");
    info!("   Chains: {:?}", chains);
    info!(
        "   Precompute interval: {} seconds",
        settings.precompute.interval_seconds
    );
    info!("   Health interval: {} seconds", args.health_interval);

    // 5. Health loop until Ctrl+C
    let mut ticker = interval(Duration::from_secs(args.health_interval.max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let health = engine.get_system_health();
                let perf = engine.get_performance_metrics();
                let analytics = engine.get_route_analytics();
                let routes: usize = analytics.chains.iter().map(|c| c.routes).sum();
                match health.status {
                    HealthStatus::Healthy => info!(
                        "✅ healthy: {} routes, {} queries, error rate {:.3}, breaker {}",
                        routes, perf.queries_total, health.error_rate, health.circuit_breaker_state
                    ),
                    HealthStatus::Degraded => warn!("⚠️ degraded: {:?}", health.reasons),
                    HealthStatus::Critical => error!("❌ critical: {:?}", health.reasons),
                }
                dex_route_engine::metrics::record_heartbeat();
            }
            _ = signal::ctrl_c() => {
                info!("🛑 Shutdown signal received");
                break;
            }
        }
    }

    engine.destroy().await;
    // dropping the engine closes the event channel so the writer can flush
    drop(engine);
    if let Some(writer) = event_writer {
        if let Err(e) = writer.await {
            error!("❌ Event log writer task failed: {}", e);
        }
    }
    info!("✅ Route Engine Service stopped");
    Ok(())
}
