//! Tick storage engine
//!
//! In-memory recent history, OHLC aggregation and a latest-price table, backed by
//! asynchronous per-symbol/per-day segment files.

pub mod engine;
pub mod ohlc;
pub mod persister;
pub mod ring_buffer;
pub mod segment;
pub mod throttle;
pub mod tick;
pub mod timeframe;
pub mod write_queue;

pub use engine::{IngestOutcome, StoreStats, TickStore};
pub use ohlc::{OhlcBar, OhlcCache};
pub use ring_buffer::RingBuffer;
pub use segment::SegmentStore;
pub use tick::Tick;
pub use timeframe::Timeframe;
pub use write_queue::{WriteQueue, WriteQueueStats};
