use std::collections::HashMap;

use parking_lot::RwLock;

use super::tick::Tick;

/// Fixed-capacity circular buffer
///
/// `push` is O(1) and overwrites the oldest entry once full. `latest(k)` copies out the
/// last k entries in arrival order.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    slots: Vec<Option<T>>,
    /// Index the next push writes to
    head: usize,
    len: usize,
}

impl<T: Clone> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            head: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append an item, returning the evicted one when the buffer was full
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = self.slots[self.head].replace(item);
        self.head = (self.head + 1) % self.capacity();
        if self.len < self.capacity() {
            self.len += 1;
        }
        evicted
    }

    /// Most recent `count` items, oldest first
    pub fn latest(&self, count: usize) -> Vec<T> {
        let take = count.min(self.len);
        let cap = self.capacity();
        // Oldest of the requested window sits `take` slots behind head
        let start = (self.head + cap - take) % cap;

        (0..take)
            .filter_map(|i| self.slots[(start + i) % cap].clone())
            .collect()
    }
}

/// Per-symbol recent-history buffers
pub struct RecentTicks {
    capacity: usize,
    buffers: RwLock<HashMap<String, RingBuffer<Tick>>>,
}

impl RecentTicks {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            buffers: RwLock::new(HashMap::new()),
        }
    }

    pub fn push(&self, tick: Tick) {
        let mut buffers = self.buffers.write();
        buffers
            .entry(tick.symbol().to_string())
            .or_insert_with(|| RingBuffer::new(self.capacity))
            .push(tick);
    }

    pub fn latest(&self, symbol: &str, count: usize) -> Vec<Tick> {
        self.buffers
            .read()
            .get(symbol)
            .map(|buffer| buffer.latest(count))
            .unwrap_or_default()
    }

    pub fn len(&self, symbol: &str) -> usize {
        self.buffers.read().get(symbol).map(RingBuffer::len).unwrap_or(0)
    }

    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.buffers.read().keys().cloned().collect();
        symbols.sort();
        symbols
    }
}
