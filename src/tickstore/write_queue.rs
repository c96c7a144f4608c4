use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;
use utoipa::ToSchema;

use super::tick::Tick;

/// Statistics for the persistence queue
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WriteQueueStats {
    /// Ticks currently waiting (sealed batches + open batch)
    pub current_size: usize,
    pub sealed_batches: usize,
    pub max_batches: usize,
    pub batch_size: usize,
    pub total_enqueued: u64,
    pub total_drained: u64,
    pub dropped_batches: u64,
    pub dropped_ticks: u64,
}

#[derive(Default)]
struct QueueInner {
    sealed: VecDeque<Vec<Tick>>,
    open: Vec<Tick>,
}

/// Bounded persistence queue between ingestion and the persistence worker
///
/// Ticks collect in an open batch that seals at `batch_size`. At most `max_batches`
/// sealed batches are held; sealing one more drops the oldest sealed batch instead of
/// blocking the producer. Sealing wakes the worker through `notify`.
pub struct WriteQueue {
    inner: Mutex<QueueInner>,
    batch_size: usize,
    max_batches: usize,
    notify: Notify,
    total_enqueued: AtomicU64,
    total_drained: AtomicU64,
    dropped_batches: AtomicU64,
    dropped_ticks: AtomicU64,
}

impl WriteQueue {
    pub fn new(batch_size: usize, max_batches: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            inner: Mutex::new(QueueInner {
                sealed: VecDeque::new(),
                open: Vec::with_capacity(batch_size),
            }),
            batch_size,
            max_batches: max_batches.max(1),
            notify: Notify::new(),
            total_enqueued: AtomicU64::new(0),
            total_drained: AtomicU64::new(0),
            dropped_batches: AtomicU64::new(0),
            dropped_ticks: AtomicU64::new(0),
        }
    }

    /// Enqueue a tick; never blocks on the consumer
    pub fn enqueue(&self, tick: Tick) {
        let sealed = {
            let mut inner = self.inner.lock();
            inner.open.push(tick);

            if inner.open.len() >= self.batch_size {
                let batch = std::mem::replace(&mut inner.open, Vec::with_capacity(self.batch_size));
                self.push_sealed(&mut inner, batch);
                true
            } else {
                false
            }
        };

        self.total_enqueued.fetch_add(1, Ordering::Relaxed);

        if sealed {
            self.notify.notify_one();
        }
    }

    fn push_sealed(&self, inner: &mut QueueInner, batch: Vec<Tick>) {
        inner.sealed.push_back(batch);
        while inner.sealed.len() > self.max_batches {
            if let Some(dropped) = inner.sealed.pop_front() {
                self.dropped_batches.fetch_add(1, Ordering::Relaxed);
                self.dropped_ticks.fetch_add(dropped.len() as u64, Ordering::Relaxed);
                tracing::warn!(
                    "⚠️  Persistence queue saturated ({} batches), dropped oldest batch of {} ticks",
                    self.max_batches,
                    dropped.len()
                );
            }
        }
    }

    /// Take every queued tick (sealed batches first, then the open batch), in arrival order
    pub fn drain_all(&self) -> Vec<Tick> {
        let mut inner = self.inner.lock();
        let mut ticks: Vec<Tick> = inner.sealed.drain(..).flatten().collect();
        ticks.append(&mut inner.open);
        drop(inner);

        self.total_drained.fetch_add(ticks.len() as u64, Ordering::Relaxed);
        if !ticks.is_empty() {
            tracing::debug!("📤 Drained {} ticks from persistence queue", ticks.len());
        }
        ticks
    }

    /// Put ticks that failed to persist back at the front
    ///
    /// They count against the batch bound like anything else, so a long outage still
    /// drops the oldest data rather than growing without limit.
    pub fn requeue_front(&self, ticks: Vec<Tick>) {
        if ticks.is_empty() {
            return;
        }
        let mut inner = self.inner.lock();
        let mut chunks: Vec<Vec<Tick>> = ticks
            .chunks(self.batch_size)
            .map(|chunk| chunk.to_vec())
            .collect();
        while let Some(chunk) = chunks.pop() {
            inner.sealed.push_front(chunk);
        }
        while inner.sealed.len() > self.max_batches {
            if let Some(dropped) = inner.sealed.pop_front() {
                self.dropped_batches.fetch_add(1, Ordering::Relaxed);
                self.dropped_ticks.fetch_add(dropped.len() as u64, Ordering::Relaxed);
            }
        }
    }

    /// Wait until a batch seals (or `wake` is called)
    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner.sealed.iter().map(Vec::len).sum::<usize>() + inner.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> WriteQueueStats {
        let (current_size, sealed_batches) = {
            let inner = self.inner.lock();
            (
                inner.sealed.iter().map(Vec::len).sum::<usize>() + inner.open.len(),
                inner.sealed.len(),
            )
        };
        WriteQueueStats {
            current_size,
            sealed_batches,
            max_batches: self.max_batches,
            batch_size: self.batch_size,
            total_enqueued: self.total_enqueued.load(Ordering::Relaxed),
            total_drained: self.total_drained.load(Ordering::Relaxed),
            dropped_batches: self.dropped_batches.load(Ordering::Relaxed),
            dropped_ticks: self.dropped_ticks.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn create_test_tick(n: i64) -> Tick {
        let bid = Decimal::new(10_000 + n, 4);
        Tick::new("fix", "EURUSD", bid, bid, "lp", Utc::now()).unwrap()
    }

    #[test]
    fn test_queue_creation() {
        let queue = WriteQueue::new(500, 10);
        let stats = queue.stats();

        assert_eq!(stats.current_size, 0);
        assert_eq!(stats.batch_size, 500);
        assert_eq!(stats.max_batches, 10);
        assert_eq!(stats.total_enqueued, 0);
    }

    #[test]
    fn test_enqueue_and_drain_preserves_order() {
        let queue = WriteQueue::new(3, 10);
        for i in 0..7 {
            queue.enqueue(create_test_tick(i));
        }

        let stats = queue.stats();
        assert_eq!(stats.current_size, 7);
        assert_eq!(stats.sealed_batches, 2);

        let ticks = queue.drain_all();
        let bids: Vec<Decimal> = ticks.iter().map(Tick::bid).collect();
        let expected: Vec<Decimal> = (0..7).map(|i| Decimal::new(10_000 + i, 4)).collect();
        assert_eq!(bids, expected);
        assert!(queue.is_empty());
        assert_eq!(queue.stats().total_drained, 7);
    }

    #[test]
    fn test_saturation_drops_oldest_batch() {
        let queue = WriteQueue::new(2, 2);
        // 3 sealed batches: [0,1] [2,3] [4,5]; the first must be dropped
        for i in 0..6 {
            queue.enqueue(create_test_tick(i));
        }

        let stats = queue.stats();
        assert_eq!(stats.dropped_batches, 1);
        assert_eq!(stats.dropped_ticks, 2);
        assert_eq!(stats.total_enqueued, 6);

        let ticks = queue.drain_all();
        assert_eq!(ticks.len(), 4);
        assert_eq!(ticks[0].bid(), Decimal::new(10_002, 4));
    }

    #[test]
    fn test_requeue_front_keeps_failed_ticks_first() {
        let queue = WriteQueue::new(10, 5);
        let failed = vec![create_test_tick(0), create_test_tick(1)];
        queue.enqueue(create_test_tick(2));
        queue.requeue_front(failed);

        let ticks = queue.drain_all();
        let bids: Vec<Decimal> = ticks.iter().map(Tick::bid).collect();
        assert_eq!(
            bids,
            vec![
                Decimal::new(10_000, 4),
                Decimal::new(10_001, 4),
                Decimal::new(10_002, 4)
            ]
        );
    }

    #[tokio::test]
    async fn test_sealing_notifies_consumer() {
        let queue = std::sync::Arc::new(WriteQueue::new(2, 4));
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.notified().await })
        };
        tokio::task::yield_now().await;

        queue.enqueue(create_test_tick(0));
        queue.enqueue(create_test_tick(1));

        tokio::time::timeout(std::time::Duration::from_millis(200), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
