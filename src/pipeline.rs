use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

use crate::hub::Hub;
use crate::tickstore::{Tick, TickStore};

/// Counters for the session -> store -> hub stage
#[derive(Debug, Default)]
pub struct PipelineStats {
    ticks_processed: AtomicU64,
    ticks_forwarded: AtomicU64,
    last_tick_at: Mutex<Option<DateTime<Utc>>>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PipelineSnapshot {
    pub ticks_processed: u64,
    pub ticks_forwarded: u64,
    pub last_tick_at: Option<DateTime<Utc>>,
}

impl PipelineStats {
    fn record(&self, forwarded: bool) {
        self.ticks_processed.fetch_add(1, Ordering::Relaxed);
        if forwarded {
            self.ticks_forwarded.fetch_add(1, Ordering::Relaxed);
        }
        *self.last_tick_at.lock() = Some(Utc::now());
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            ticks_processed: self.ticks_processed.load(Ordering::Relaxed),
            ticks_forwarded: self.ticks_forwarded.load(Ordering::Relaxed),
            last_tick_at: *self.last_tick_at.lock(),
        }
    }
}

/// Consumes session ticks: store first, then hand to the hub
///
/// Neither step performs I/O, so the tick channel drains as fast as ticks arrive.
pub struct Pipeline {
    store: Arc<TickStore>,
    hub: Arc<Hub>,
    stats: Arc<PipelineStats>,
}

impl Pipeline {
    pub fn new(store: Arc<TickStore>, hub: Arc<Hub>) -> Self {
        Self {
            store,
            hub,
            stats: Arc::new(PipelineStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    pub fn process(&self, tick: Tick) {
        let outcome = self.store.ingest(tick.clone());
        let forwarded = self.hub.forward(&tick, outcome.significant).is_some();
        self.stats.record(forwarded);
    }

    /// Run until cancelled or the session drops its sender
    pub async fn run(self, mut ticks: mpsc::Receiver<Tick>, cancel: CancellationToken) {
        tracing::info!("🌉 Tick pipeline started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = ticks.recv() => match next {
                    Some(tick) => self.process(tick),
                    None => break,
                },
            }
        }

        // Whatever the session already handed over still gets stored
        ticks.close();
        while let Ok(tick) = ticks.try_recv() {
            self.process(tick);
        }

        let stats = self.stats.snapshot();
        tracing::info!(
            "🔴 Tick pipeline stopped after {} ticks ({} forwarded)",
            stats.ticks_processed,
            stats.ticks_forwarded
        );
    }

    pub fn start(self, ticks: mpsc::Receiver<Tick>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(ticks, cancel))
    }
}
