use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use super::segment::SegmentStore;
use super::tick::Tick;
use super::write_queue::WriteQueue;

/// Counters shared between the persistence worker and the store's stats
#[derive(Debug, Default)]
pub struct PersistCounters {
    pub persisted: AtomicU64,
    pub write_failures: AtomicU64,
    pub flushes: AtomicU64,
}

/// Result of writing one drained set of ticks
struct FlushOutcome {
    persisted: usize,
    failed: Vec<Tick>,
}

/// Tick persister with batching
///
/// Drains the write queue and appends to the segment store either when:
/// - A batch seals in the queue (`batch_size` ticks)
/// - The flush interval elapses
///
/// Disk writes run on the blocking pool. A group that fails to write goes back to the
/// front of the queue and is retried on the next cycle.
pub struct TickPersister {
    queue: Arc<WriteQueue>,
    segments: Arc<SegmentStore>,
    counters: Arc<PersistCounters>,
    flush_interval: Duration,
    shutdown_timeout: Duration,
}

impl TickPersister {
    pub fn new(
        queue: Arc<WriteQueue>,
        segments: Arc<SegmentStore>,
        counters: Arc<PersistCounters>,
        flush_interval: Duration,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            segments,
            counters,
            flush_interval,
            shutdown_timeout,
        }
    }

    /// Start the persistence background task
    ///
    /// Runs until `cancel` fires, then performs one final flush bounded by the shutdown
    /// timeout.
    pub fn start(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(
                "💾 Tick persister started (flush every {:?})",
                self.flush_interval
            );

            let mut flush_timer = interval(self.flush_interval);
            // First tick completes immediately
            flush_timer.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,

                    // A batch sealed
                    _ = self.queue.notified() => {
                        self.flush().await;
                    }

                    // Periodic flush timer
                    _ = flush_timer.tick() => {
                        self.flush().await;
                    }
                }
            }

            match tokio::time::timeout(self.shutdown_timeout, self.flush()).await {
                Ok(persisted) => {
                    tracing::info!("💾 Final flush persisted {} ticks", persisted);
                }
                Err(_) => {
                    tracing::error!(
                        "❌ Final flush did not finish within {:?}; {} ticks left unpersisted",
                        self.shutdown_timeout,
                        self.queue.len()
                    );
                }
            }
        })
    }

    /// Drain the queue and write everything; returns the number of ticks persisted
    pub async fn flush(&self) -> usize {
        let ticks = self.queue.drain_all();
        if ticks.is_empty() {
            return 0;
        }

        let tick_count = ticks.len();
        let groups = group_by_symbol_day(ticks);
        let segments = self.segments.clone();

        let outcome =
            match tokio::task::spawn_blocking(move || write_groups(&segments, groups)).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.counters.write_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::error!("❌ Persistence task failed, {} ticks lost: {}", tick_count, e);
                    return 0;
                }
            };

        self.counters.flushes.fetch_add(1, Ordering::Relaxed);
        self.counters
            .persisted
            .fetch_add(outcome.persisted as u64, Ordering::Relaxed);

        if !outcome.failed.is_empty() {
            tracing::warn!(
                "⚠️  Requeueing {} ticks after write failure",
                outcome.failed.len()
            );
            self.queue.requeue_front(outcome.failed);
        }

        tracing::debug!(
            "Flushed {} of {} ticks to segments",
            outcome.persisted,
            tick_count
        );
        outcome.persisted
    }
}

/// Group ticks by (symbol, UTC day), keeping first-seen group order and arrival order
fn group_by_symbol_day(ticks: Vec<Tick>) -> Vec<((String, NaiveDate), Vec<Tick>)> {
    let mut index: HashMap<(String, NaiveDate), usize> = HashMap::new();
    let mut groups: Vec<((String, NaiveDate), Vec<Tick>)> = Vec::new();

    for tick in ticks {
        let key = (tick.symbol().to_string(), tick.date());
        match index.get(&key) {
            Some(&i) => groups[i].1.push(tick),
            None => {
                index.insert(key.clone(), groups.len());
                groups.push((key, vec![tick]));
            }
        }
    }

    groups
}

fn write_groups(
    segments: &SegmentStore,
    groups: Vec<((String, NaiveDate), Vec<Tick>)>,
) -> FlushOutcome {
    let mut outcome = FlushOutcome {
        persisted: 0,
        failed: Vec::new(),
    };

    for ((symbol, date), ticks) in groups {
        match segments.append(&symbol, date, &ticks) {
            Ok(written) => outcome.persisted += written,
            Err(e) => {
                tracing::error!("❌ {}", e);
                outcome.failed.extend(ticks);
            }
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    fn tick(symbol: &str, day: u32, n: i64) -> Tick {
        let ts = Utc.with_ymd_and_hms(2024, 6, day, 9, 0, 0).unwrap() + chrono::Duration::seconds(n);
        let bid = Decimal::new(10_000 + n, 4);
        Tick::new("fix", symbol, bid, bid, "lp", ts).unwrap()
    }

    fn persister(dir: &TempDir, queue: Arc<WriteQueue>) -> (TickPersister, Arc<SegmentStore>, Arc<PersistCounters>) {
        let segments = Arc::new(SegmentStore::open(dir.path(), 1000).unwrap());
        let counters = Arc::new(PersistCounters::default());
        let p = TickPersister::new(
            queue,
            segments.clone(),
            counters.clone(),
            Duration::from_secs(30),
            Duration::from_secs(5),
        );
        (p, segments, counters)
    }

    #[test]
    fn test_grouping_preserves_arrival_order() {
        let ticks = vec![
            tick("EURUSD", 3, 0),
            tick("GBPUSD", 3, 1),
            tick("EURUSD", 3, 2),
            tick("EURUSD", 4, 3),
        ];
        let groups = group_by_symbol_day(ticks);

        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].0 .0, "EURUSD");
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[0].1[1].bid(), Decimal::new(10_002, 4));
        assert_eq!(groups[1].0 .0, "GBPUSD");
        assert_eq!(groups[2].0 .1, NaiveDate::from_ymd_opt(2024, 6, 4).unwrap());
    }

    #[tokio::test]
    async fn test_flush_writes_per_symbol_day() {
        let dir = TempDir::new().unwrap();
        let queue = Arc::new(WriteQueue::new(100, 10));
        let (p, segments, counters) = persister(&dir, queue.clone());

        queue.enqueue(tick("EURUSD", 3, 0));
        queue.enqueue(tick("EURUSD", 4, 1));
        queue.enqueue(tick("GBPUSD", 3, 2));

        assert_eq!(p.flush().await, 3);
        assert!(queue.is_empty());
        assert_eq!(counters.persisted.load(Ordering::Relaxed), 3);

        let d3 = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
        assert_eq!(segments.read_day("EURUSD", d3).unwrap().len(), 1);
        assert_eq!(segments.available_dates("EURUSD").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_group_is_requeued() {
        let dir = TempDir::new().unwrap();
        let queue = Arc::new(WriteQueue::new(100, 10));
        let (p, _segments, counters) = persister(&dir, queue.clone());

        // A plain file where the symbol directory should be makes the append fail
        std::fs::write(dir.path().join("EURUSD"), b"not a directory").unwrap();

        queue.enqueue(tick("EURUSD", 3, 0));
        queue.enqueue(tick("GBPUSD", 3, 1));

        assert_eq!(p.flush().await, 1);
        assert_eq!(counters.persisted.load(Ordering::Relaxed), 1);

        let left = queue.drain_all();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].symbol(), "EURUSD");
    }

    #[tokio::test]
    async fn test_shutdown_performs_final_flush() {
        let dir = TempDir::new().unwrap();
        let queue = Arc::new(WriteQueue::new(100, 10));
        let (p, segments, _counters) = persister(&dir, queue.clone());

        let cancel = CancellationToken::new();
        let handle = p.start(cancel.clone());

        queue.enqueue(tick("EURUSD", 3, 0));
        cancel.cancel();
        handle.await.unwrap();

        let d3 = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
        assert_eq!(segments.read_day("EURUSD", d3).unwrap().len(), 1);
    }
}
