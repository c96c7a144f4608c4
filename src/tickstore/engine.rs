use chrono::NaiveDate;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

use super::ohlc::{OhlcBar, OhlcCache};
use super::persister::{PersistCounters, TickPersister};
use super::ring_buffer::RecentTicks;
use super::segment::SegmentStore;
use super::throttle::Throttle;
use super::tick::Tick;
use super::timeframe::Timeframe;
use super::write_queue::WriteQueue;
use crate::config::StoreConfig;
use crate::error::StoreError;

/// Result of ingesting one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOutcome {
    /// Mid moved by at least the broadcast epsilon since the last significant tick
    pub significant: bool,
}

/// Store statistics
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StoreStats {
    pub received: u64,
    pub significant: u64,
    pub throttled: u64,
    pub late_ohlc_ticks: u64,
    pub enqueued: u64,
    pub persisted: u64,
    pub dropped_batches: u64,
    pub dropped_ticks: u64,
    pub write_failures: u64,
    pub queue_depth: usize,
    pub symbols: usize,
}

/// In-memory views plus asynchronous durable storage for ticks
///
/// `ingest` touches only in-memory structures and the persistence queue; disk I/O happens
/// on the persistence worker started by [`TickStore::start_persister`].
pub struct TickStore {
    config: StoreConfig,
    recent: RecentTicks,
    ohlc: OhlcCache,
    latest: RwLock<HashMap<String, Tick>>,
    throttle: Throttle,
    queue: Arc<WriteQueue>,
    segments: Arc<SegmentStore>,
    persist_counters: Arc<PersistCounters>,
    received: AtomicU64,
    significant: AtomicU64,
    throttled: AtomicU64,
}

impl TickStore {
    /// Open the store rooted at `config.data_dir`
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let segments = SegmentStore::open(&config.data_dir, config.max_records_per_segment)?;

        tracing::info!(
            "📦 Tick store opened at {} (buffer {} per symbol)",
            config.data_dir.display(),
            config.buffer_capacity
        );

        Ok(Self {
            recent: RecentTicks::new(config.buffer_capacity),
            ohlc: OhlcCache::with_all_timeframes(config.max_bars_per_series),
            latest: RwLock::new(HashMap::new()),
            throttle: Throttle::new(config.broadcast_epsilon),
            queue: Arc::new(WriteQueue::new(config.batch_size, config.max_queued_batches)),
            segments: Arc::new(segments),
            persist_counters: Arc::new(PersistCounters::default()),
            received: AtomicU64::new(0),
            significant: AtomicU64::new(0),
            throttled: AtomicU64::new(0),
            config,
        })
    }

    /// Spawn the persistence worker for this store
    pub fn start_persister(&self, cancel: CancellationToken) -> JoinHandle<()> {
        TickPersister::new(
            self.queue.clone(),
            self.segments.clone(),
            self.persist_counters.clone(),
            self.config.flush_interval(),
            self.config.shutdown_flush_timeout(),
        )
        .start(cancel)
    }

    pub fn ingest(&self, tick: Tick) -> IngestOutcome {
        self.received.fetch_add(1, Ordering::Relaxed);

        let significant = self.throttle.is_significant(&tick);
        if significant {
            self.significant.fetch_add(1, Ordering::Relaxed);
        } else {
            self.throttled.fetch_add(1, Ordering::Relaxed);
        }

        self.recent.push(tick.clone());
        self.ohlc.update_from_tick(&tick);
        self.latest
            .write()
            .insert(tick.symbol().to_string(), tick.clone());
        self.queue.enqueue(tick);

        IngestOutcome { significant }
    }

    /// Up to `count` most recent ticks, oldest first
    pub fn get_recent(&self, symbol: &str, count: usize) -> Vec<Tick> {
        self.recent.latest(symbol, count)
    }

    pub fn get_ohlc(&self, symbol: &str, timeframe: Timeframe, count: usize) -> Vec<OhlcBar> {
        self.ohlc.get_bars(symbol, timeframe, count)
    }

    pub fn rebuild_ohlc(&self, symbol: &str, ticks: &[Tick]) {
        self.ohlc.rebuild_from_ticks(symbol, ticks);
    }

    /// Rebuild bars from today's stored ticks for every persisted symbol
    pub fn warm_up(&self, today: NaiveDate) -> Result<usize, StoreError> {
        let mut rebuilt = 0;
        for symbol in self.segments.symbols()? {
            let ticks = self.segments.read_day(&symbol, today)?;
            if ticks.is_empty() {
                continue;
            }
            let symbol = ticks[0].symbol().to_string();
            self.rebuild_ohlc(&symbol, &ticks);
            if let Some(last) = ticks.last() {
                self.latest.write().insert(symbol, last.clone());
            }
            rebuilt += 1;
        }
        Ok(rebuilt)
    }

    /// Stored ticks for one day, in arrival order
    pub fn history(&self, symbol: &str, date: NaiveDate) -> Result<Vec<Tick>, StoreError> {
        self.segments.read_day(symbol, date)
    }

    pub fn history_range(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
        limit: usize,
    ) -> Result<Vec<Tick>, StoreError> {
        self.segments.read_range(symbol, from, to, limit)
    }

    pub fn available_dates(&self, symbol: &str) -> Result<Vec<NaiveDate>, StoreError> {
        self.segments.available_dates(symbol)
    }

    pub fn cleanup_older_than(&self, retention_days: u32, today: NaiveDate) -> Result<usize, StoreError> {
        self.segments.cleanup_older_than(retention_days, today)
    }

    pub fn retention_days(&self) -> u32 {
        self.config.retention_days
    }

    pub fn latest(&self, symbol: &str) -> Option<Tick> {
        self.latest.read().get(symbol).cloned()
    }

    /// Latest tick of every symbol, sorted by symbol
    pub fn latest_all(&self) -> Vec<Tick> {
        let mut ticks: Vec<Tick> = self.latest.read().values().cloned().collect();
        ticks.sort_by(|a, b| a.symbol().cmp(b.symbol()));
        ticks
    }

    pub fn stats(&self) -> StoreStats {
        let queue = self.queue.stats();
        StoreStats {
            received: self.received.load(Ordering::Relaxed),
            significant: self.significant.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
            late_ohlc_ticks: self.ohlc.late_ticks(),
            enqueued: queue.total_enqueued,
            persisted: self.persist_counters.persisted.load(Ordering::Relaxed),
            dropped_batches: queue.dropped_batches,
            dropped_ticks: queue.dropped_ticks,
            write_failures: self.persist_counters.write_failures.load(Ordering::Relaxed),
            queue_depth: queue.current_size,
            symbols: self.latest.read().len(),
        }
    }
}
