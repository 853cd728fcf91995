// Engine events - typed outbound channel drained by the host process.
// Emission never blocks and never affects routing; a closed receiver only counts drops.

use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    PoolUpdated {
        ts: u64,
        pool_id: String,
        chain: String,
        token0: Address,
        token1: Address,
        invalidated_queries: usize,
    },

    PrecomputationCompleted {
        ts: u64,
        cycle: u64,
        duration_ms: u64,
        chains: usize,
        routes: usize,
    },

    PrecomputationFailed {
        ts: u64,
        cycle: u64,
        chain: String,
        error: String,
    },

    /// Degradation signal: the cycle finished but took longer than the threshold
    SlowPrecomputation {
        ts: u64,
        cycle: u64,
        duration_ms: u64,
        threshold_ms: u64,
    },

    ArbitrageOpportunityFound {
        ts: u64,
        chain: String,
        route_id: String,
        protocols: Vec<String>,
        profitability_score: f64,
        risk_score: f64,
    },

    CircuitBreakerOpened {
        ts: u64,
        consecutive_failures: u32,
        retry_after_ms: u64,
    },

    CircuitBreakerReset {
        ts: u64,
    },
}

impl EngineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::PoolUpdated { .. } => "pool_updated",
            EngineEvent::PrecomputationCompleted { .. } => "precomputation_completed",
            EngineEvent::PrecomputationFailed { .. } => "precomputation_failed",
            EngineEvent::SlowPrecomputation { .. } => "slow_precomputation",
            EngineEvent::ArbitrageOpportunityFound { .. } => "arbitrage_opportunity_found",
            EngineEvent::CircuitBreakerOpened { .. } => "circuit_breaker_opened",
            EngineEvent::CircuitBreakerReset { .. } => "circuit_breaker_reset",
        }
    }
}

#[derive(Debug)]
pub struct EventRecorder {
    enabled: AtomicBool,
    event_tx: mpsc::UnboundedSender<EngineEvent>,
    event_count: AtomicU64,
    dropped_events: AtomicU64,
}

impl EventRecorder {
    /// Creates an enabled recorder and the receiver the host drains.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();

        (
            Self {
                enabled: AtomicBool::new(true),
                event_tx: tx,
                event_count: AtomicU64::new(0),
                dropped_events: AtomicU64::new(0),
            },
            rx,
        )
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn record(&self, event: EngineEvent) {
        if !self.is_enabled() {
            return;
        }
        match self.event_tx.send(event) {
            Ok(_) => {
                self.event_count.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.dropped_events.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// (enabled, sent, dropped)
    pub fn stats(&self) -> (bool, u64, u64) {
        (
            self.is_enabled(),
            self.event_count.load(Ordering::Relaxed),
            self.dropped_events.load(Ordering::Relaxed),
        )
    }
}

/// Uniform emission whether or not a recorder is attached.
pub trait EventSink {
    fn emit(&self, event: EngineEvent);
}

impl EventSink for Option<Arc<EventRecorder>> {
    fn emit(&self, event: EngineEvent) {
        if let Some(ref r) = self {
            r.record(event);
        }
    }
}

impl EventSink for Arc<EventRecorder> {
    fn emit(&self, event: EngineEvent) {
        self.record(event);
    }
}

/// Writes events as JSON Lines until the channel closes.
pub async fn event_log_writer(
    mut event_rx: mpsc::UnboundedReceiver<EngineEvent>,
    output_file: String,
) -> anyhow::Result<u64> {
    if let Some(parent) = std::path::Path::new(&output_file).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let file = File::create(&output_file).await?;
    let mut writer = BufWriter::new(file);

    let mut count = 0u64;
    while let Some(event) = event_rx.recv().await {
        let json = serde_json::to_string(&event)?;
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        count += 1;
        if count % 10 == 0 {
            writer.flush().await?;
        }
    }

    writer.flush().await?;
    log::info!("✅ Event log saved {} events to {}", count, output_file);
    Ok(count)
}
