use dashmap::DashMap;
use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use utoipa::ToSchema;
use uuid::Uuid;

use super::auth::{Identity, TokenValidator};
use super::messages::{encode, Outbound, WsMessage};
use super::subscriber::{Delivery, Subscriber, SubscriberInfo};
use super::ForwardMode;
use crate::config::HubConfig;
use crate::error::HubError;
use crate::tickstore::Tick;

/// Outcome of one fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub filtered: usize,
    pub dropped: usize,
    pub evicted: usize,
    pub closed: usize,
}

/// Fan-out latency percentiles in microseconds
#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct FanoutLatency {
    pub samples: u64,
    pub p50_us: u64,
    pub p99_us: u64,
    pub p999_us: u64,
    pub max_us: u64,
    pub mean_us: f64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HubStats {
    pub forward_mode: ForwardMode,
    pub subscribers: usize,
    pub connections_total: u64,
    pub ticks_forwarded: u64,
    pub ticks_skipped: u64,
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub evictions: u64,
    pub fanout_latency: FanoutLatency,
    pub subscriber_details: Vec<SubscriberInfo>,
}

/// Distribution hub: registry of websocket subscribers and tick fan-out
///
/// A slow subscriber only ever loses its own messages: every send is a `try_send` onto that
/// subscriber's bounded queue, and a subscriber that keeps its queue full for more than
/// `max_drop_streak` consecutive messages is evicted.
pub struct Hub {
    config: HubConfig,
    validator: Arc<dyn TokenValidator>,
    subscribers: DashMap<Uuid, Arc<Subscriber>>,
    /// Held while joining or while collecting fan-out targets, so a join and its snapshot are
    /// atomic with respect to broadcasts
    join_gate: Mutex<()>,
    fanout_latency_ns: Mutex<Histogram<u64>>,
    connections_total: AtomicU64,
    ticks_forwarded: AtomicU64,
    ticks_skipped: AtomicU64,
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
    evictions: AtomicU64,
}

impl Hub {
    pub fn new(config: HubConfig, validator: Arc<dyn TokenValidator>) -> Result<Self, HubError> {
        // 1ns to 10 seconds, 3 significant figures
        let histogram = Histogram::new_with_bounds(1, 10_000_000_000, 3)?;

        Ok(Self {
            config,
            validator,
            subscribers: DashMap::new(),
            join_gate: Mutex::new(()),
            fanout_latency_ns: Mutex::new(histogram),
            connections_total: AtomicU64::new(0),
            ticks_forwarded: AtomicU64::new(0),
            ticks_skipped: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub async fn authenticate(&self, token: &str) -> Result<Identity, HubError> {
        self.validator.validate(token).await
    }

    /// Add a subscriber and capture `snapshot` with no broadcast in between; the returned
    /// receiver feeds its writer task
    ///
    /// Callers ingest a tick before broadcasting it, so every tick is either reflected in the
    /// snapshot or queued for the new subscriber, and nothing queued is older than the snapshot.
    pub fn register_with<S>(
        &self,
        identity: Identity,
        snapshot: impl FnOnce() -> S,
    ) -> (Arc<Subscriber>, mpsc::Receiver<Outbound>, S) {
        let (subscriber, rx) = Subscriber::new(identity, self.config.queue_capacity);
        let subscriber = Arc::new(subscriber);
        let snapshot = {
            let _gate = self.join_gate.lock();
            let snapshot = snapshot();
            self.subscribers.insert(subscriber.id(), Arc::clone(&subscriber));
            snapshot
        };
        self.connections_total.fetch_add(1, Ordering::Relaxed);

        tracing::info!(
            "🔗 Subscriber {} joined ({}), {} connected",
            subscriber.id(),
            subscriber.identity().subject,
            self.subscribers.len()
        );
        (subscriber, rx, snapshot)
    }

    pub fn unregister(&self, id: Uuid) -> bool {
        match self.subscribers.remove(&id) {
            Some((_, subscriber)) => {
                subscriber.close();
                tracing::info!(
                    "👋 Subscriber {} left, {} connected",
                    id,
                    self.subscribers.len()
                );
                true
            }
            None => false,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Disconnect every subscriber; used on shutdown
    pub fn close_all(&self) -> usize {
        let ids: Vec<Uuid> = self.subscribers.iter().map(|entry| *entry.key()).collect();
        ids.into_iter().filter(|id| self.unregister(*id)).count()
    }

    /// Apply the forward mode, then broadcast
    pub fn forward(&self, tick: &Tick, significant: bool) -> Option<BroadcastReport> {
        if self.config.forward_mode == ForwardMode::Throttled && !significant {
            self.ticks_skipped.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        Some(self.broadcast(tick))
    }

    /// Offer a tick to every subscriber without waiting on any of them
    pub fn broadcast(&self, tick: &Tick) -> BroadcastReport {
        let start = Instant::now();
        let mut report = BroadcastReport::default();

        // Snapshot so no DashMap shard lock is held while sending
        let subscribers: Vec<Arc<Subscriber>> = {
            let _gate = self.join_gate.lock();
            self.subscribers
                .iter()
                .map(|entry| Arc::clone(entry.value()))
                .collect()
        };
        if subscribers.is_empty() {
            return report;
        }

        let message = match encode(&WsMessage::Tick(tick.clone())) {
            Ok(message) => message,
            Err(e) => {
                tracing::error!("Failed to encode tick for {}: {}", tick.symbol(), e);
                return report;
            }
        };

        for subscriber in subscribers {
            match subscriber.offer(tick.symbol(), &message) {
                Delivery::Sent => report.delivered += 1,
                Delivery::Filtered => report.filtered += 1,
                Delivery::Dropped { streak } => {
                    report.dropped += 1;
                    if streak > self.config.max_drop_streak {
                        self.evict(&subscriber);
                        report.evicted += 1;
                    }
                }
                Delivery::Closed => {
                    self.unregister(subscriber.id());
                    report.closed += 1;
                }
            }
        }

        self.ticks_forwarded.fetch_add(1, Ordering::Relaxed);
        self.messages_sent
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.messages_dropped
            .fetch_add(report.dropped as u64, Ordering::Relaxed);

        let nanos = start.elapsed().as_nanos() as u64;
        let _ = self.fanout_latency_ns.lock().record(nanos.max(1));

        report
    }

    fn evict(&self, subscriber: &Subscriber) {
        let err = HubError::SlowConsumer {
            subscriber: subscriber.id(),
            drops: subscriber.drops(),
        };
        tracing::warn!("⚠️  Evicting subscriber: {}", err);
        self.evictions.fetch_add(1, Ordering::Relaxed);
        self.unregister(subscriber.id());
    }

    pub fn stats(&self) -> HubStats {
        let fanout_latency = {
            let histogram = self.fanout_latency_ns.lock();
            if histogram.is_empty() {
                FanoutLatency::default()
            } else {
                FanoutLatency {
                    samples: histogram.len(),
                    p50_us: histogram.value_at_percentile(50.0) / 1_000,
                    p99_us: histogram.value_at_percentile(99.0) / 1_000,
                    p999_us: histogram.value_at_percentile(99.9) / 1_000,
                    max_us: histogram.max() / 1_000,
                    mean_us: histogram.mean() / 1_000.0,
                }
            }
        };

        let mut subscriber_details: Vec<SubscriberInfo> = self
            .subscribers
            .iter()
            .map(|entry| entry.value().info())
            .collect();
        subscriber_details.sort_by_key(|info| info.connected_at);

        HubStats {
            forward_mode: self.config.forward_mode,
            subscribers: subscriber_details.len(),
            connections_total: self.connections_total.load(Ordering::Relaxed),
            ticks_forwarded: self.ticks_forwarded.load(Ordering::Relaxed),
            ticks_skipped: self.ticks_skipped.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            fanout_latency,
            subscriber_details,
        }
    }
}
