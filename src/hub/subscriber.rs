use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;
use uuid::Uuid;

use super::auth::Identity;
use super::messages::Outbound;

/// Result of offering one message to a subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// Symbol not in the subscriber's filter
    Filtered,
    /// Queue full; `streak` consecutive drops so far
    Dropped { streak: u32 },
    /// Receiver gone
    Closed,
}

/// One connected websocket client
///
/// The hub owns the sending half of the bounded queue; the connection's writer task owns
/// the receiving half.
#[derive(Debug)]
pub struct Subscriber {
    id: Uuid,
    identity: Identity,
    tx: mpsc::Sender<Outbound>,
    /// Empty means every symbol
    symbols: RwLock<BTreeSet<String>>,
    sent: AtomicU64,
    drops: AtomicU64,
    drop_streak: AtomicU32,
    connected_at: DateTime<Utc>,
    last_activity: Mutex<DateTime<Utc>>,
    closed: CancellationToken,
}

impl Subscriber {
    pub fn new(identity: Identity, queue_capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let now = Utc::now();
        let subscriber = Self {
            id: Uuid::new_v4(),
            identity,
            tx,
            symbols: RwLock::new(BTreeSet::new()),
            sent: AtomicU64::new(0),
            drops: AtomicU64::new(0),
            drop_streak: AtomicU32::new(0),
            connected_at: now,
            last_activity: Mutex::new(now),
            closed: CancellationToken::new(),
        };
        (subscriber, rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn wants(&self, symbol: &str) -> bool {
        let symbols = self.symbols.read();
        symbols.is_empty() || symbols.contains(symbol)
    }

    /// Non-blocking enqueue; never waits on a slow client
    pub fn offer(&self, symbol: &str, message: &Outbound) -> Delivery {
        if !self.wants(symbol) {
            return Delivery::Filtered;
        }
        self.push(message.clone())
    }

    /// Enqueue a control message (pong, confirmations) regardless of the filter
    pub fn push(&self, message: Outbound) -> Delivery {
        match self.tx.try_send(message) {
            Ok(()) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
                self.drop_streak.store(0, Ordering::Relaxed);
                Delivery::Sent
            }
            Err(TrySendError::Full(_)) => {
                self.drops.fetch_add(1, Ordering::Relaxed);
                let streak = self.drop_streak.fetch_add(1, Ordering::Relaxed) + 1;
                Delivery::Dropped { streak }
            }
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Add symbols to the filter; returns the filter afterwards
    pub fn subscribe(&self, symbols: &[String]) -> Vec<String> {
        let mut filter = self.symbols.write();
        filter.extend(symbols.iter().filter(|s| !s.is_empty()).cloned());
        filter.iter().cloned().collect()
    }

    /// Remove symbols from the filter; an emptied filter means every symbol again
    pub fn unsubscribe(&self, symbols: &[String]) -> Vec<String> {
        let mut filter = self.symbols.write();
        for symbol in symbols {
            filter.remove(symbol);
        }
        filter.iter().cloned().collect()
    }

    pub fn touch(&self) {
        *self.last_activity.lock() = Utc::now();
    }

    pub fn drops(&self) -> u64 {
        self.drops.load(Ordering::Relaxed)
    }

    pub fn drop_streak(&self) -> u32 {
        self.drop_streak.load(Ordering::Relaxed)
    }

    /// Ask the connection tasks to shut down
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Resolves once the hub has closed this subscriber
    pub fn closed(&self) -> &CancellationToken {
        &self.closed
    }

    pub fn info(&self) -> SubscriberInfo {
        SubscriberInfo {
            id: self.id,
            subject: self.identity.subject.clone(),
            symbols: self.symbols.read().iter().cloned().collect(),
            sent: self.sent.load(Ordering::Relaxed),
            drops: self.drops(),
            drop_streak: self.drop_streak(),
            queued: self.tx.max_capacity() - self.tx.capacity(),
            connected_at: self.connected_at,
            last_activity: *self.last_activity.lock(),
        }
    }
}

/// Subscriber view for the status endpoint
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SubscriberInfo {
    pub id: Uuid,
    pub subject: String,
    /// Empty means every symbol
    pub symbols: Vec<String>,
    pub sent: u64,
    pub drops: u64,
    pub drop_streak: u32,
    pub queued: usize,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}
