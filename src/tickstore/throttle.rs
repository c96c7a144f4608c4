use parking_lot::Mutex;
use std::collections::HashMap;

use super::tick::Tick;

/// Broadcast significance filter
///
/// A tick is significant when its mid price moved by at least `epsilon` (relative) since
/// the last tick that was judged significant for the same symbol. Only the broadcast
/// path consults this; storage sees every tick.
pub struct Throttle {
    epsilon: f64,
    last_forwarded: Mutex<HashMap<String, f64>>,
}

impl Throttle {
    pub fn new(epsilon: f64) -> Self {
        Self {
            epsilon: epsilon.max(0.0),
            last_forwarded: Mutex::new(HashMap::new()),
        }
    }

    /// Decide significance and remember the tick when it is
    pub fn is_significant(&self, tick: &Tick) -> bool {
        let mid = tick.mid_f64();
        let mut last = self.last_forwarded.lock();

        let significant = match last.get(tick.symbol()) {
            None => true,
            Some(&prev) if prev == 0.0 => true,
            Some(&prev) => ((mid - prev) / prev).abs() >= self.epsilon,
        };

        if significant {
            last.insert(tick.symbol().to_string(), mid);
        }
        significant
    }
}
