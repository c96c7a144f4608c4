use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use utoipa::ToSchema;

use super::tick::Tick;
use super::timeframe::Timeframe;

/// OHLC (Open-High-Low-Close) bar built from tick mid prices
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OhlcBar {
    pub symbol: String,

    pub timeframe: Timeframe,

    /// Bucket start
    pub open_time: DateTime<Utc>,

    /// Bucket end (exclusive)
    pub close_time: DateTime<Utc>,

    /// Mid price of the first tick in the bucket
    #[schema(value_type = String)]
    pub open: Decimal,

    #[schema(value_type = String)]
    pub high: Decimal,

    #[schema(value_type = String)]
    pub low: Decimal,

    /// Mid price of the last tick in the bucket
    #[schema(value_type = String)]
    pub close: Decimal,

    /// Number of ticks aggregated
    pub volume: u64,
}

impl OhlcBar {
    fn open_with(tick: &Tick, timeframe: Timeframe, open_time: DateTime<Utc>) -> Self {
        let mid = tick.mid_price();
        Self {
            symbol: tick.symbol().to_string(),
            timeframe,
            open_time,
            close_time: open_time + Duration::seconds(timeframe.duration_seconds()),
            open: mid,
            high: mid,
            low: mid,
            close: mid,
            volume: 1,
        }
    }

    fn apply(&mut self, mid: Decimal) {
        if mid > self.high {
            self.high = mid;
        }
        if mid < self.low {
            self.low = mid;
        }
        self.close = mid;
        self.volume += 1;
    }
}

/// Closed bars plus the single open bar for one (symbol, timeframe)
#[derive(Debug, Default)]
struct BarSeries {
    closed: VecDeque<OhlcBar>,
    current: Option<OhlcBar>,
}

enum BarUpdate {
    Applied,
    Late,
}

impl BarSeries {
    fn update(&mut self, tick: &Tick, timeframe: Timeframe, max_closed: usize) -> BarUpdate {
        let bucket = timeframe.bucket_start(tick.timestamp());

        if let Some(bar) = self.current.as_mut() {
            if bar.open_time == bucket {
                bar.apply(tick.mid_price());
                return BarUpdate::Applied;
            }
            if bucket < bar.open_time {
                return BarUpdate::Late;
            }
        }

        if let Some(finished) = self.current.take() {
            self.closed.push_back(finished);
            while self.closed.len() > max_closed {
                self.closed.pop_front();
            }
        }
        self.current = Some(OhlcBar::open_with(tick, timeframe, bucket));
        BarUpdate::Applied
    }

    fn last(&self, count: usize) -> Vec<OhlcBar> {
        let mut bars: Vec<OhlcBar> = self.closed.iter().cloned().collect();
        if let Some(current) = &self.current {
            bars.push(current.clone());
        }
        let skip = bars.len().saturating_sub(count);
        bars.split_off(skip)
    }
}

/// Incrementally maintained OHLC bars for every (symbol, timeframe)
///
/// Exactly one open bar exists per series; it closes when a tick for a later bucket
/// arrives. Ticks older than the open bar's bucket are counted and ignored.
pub struct OhlcCache {
    timeframes: Vec<Timeframe>,
    max_bars: usize,
    series: RwLock<HashMap<(String, Timeframe), BarSeries>>,
    late_ticks: AtomicU64,
}

impl OhlcCache {
    pub fn new(timeframes: Vec<Timeframe>, max_bars: usize) -> Self {
        Self {
            timeframes,
            max_bars: max_bars.max(1),
            series: RwLock::new(HashMap::new()),
            late_ticks: AtomicU64::new(0),
        }
    }

    pub fn with_all_timeframes(max_bars: usize) -> Self {
        Self::new(Timeframe::ALL.to_vec(), max_bars)
    }

    pub fn update_from_tick(&self, tick: &Tick) {
        let mut series = self.series.write();
        for &timeframe in &self.timeframes {
            let entry = series
                .entry((tick.symbol().to_string(), timeframe))
                .or_default();
            if let BarUpdate::Late = entry.update(tick, timeframe, self.max_bars) {
                self.late_ticks.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    "Late tick for {} {} at {} ignored by OHLC cache",
                    tick.symbol(),
                    timeframe,
                    tick.timestamp()
                );
            }
        }
    }

    /// Most recent `count` bars, oldest first; the last one is the open bar
    pub fn get_bars(&self, symbol: &str, timeframe: Timeframe, count: usize) -> Vec<OhlcBar> {
        self.series
            .read()
            .get(&(symbol.to_string(), timeframe))
            .map(|series| series.last(count))
            .unwrap_or_default()
    }

    pub fn current_bar(&self, symbol: &str, timeframe: Timeframe) -> Option<OhlcBar> {
        self.series
            .read()
            .get(&(symbol.to_string(), timeframe))
            .and_then(|series| series.current.clone())
    }

    /// Discard cached bars for `symbol` and replay `ticks` in order
    pub fn rebuild_from_ticks(&self, symbol: &str, ticks: &[Tick]) {
        {
            let mut series = self.series.write();
            series.retain(|(sym, _), _| sym != symbol);
        }
        for tick in ticks.iter().filter(|t| t.symbol() == symbol) {
            self.update_from_tick(tick);
        }
        tracing::info!("🕯️  Rebuilt OHLC cache for {} from {} ticks", symbol, ticks.len());
    }

    pub fn late_ticks(&self) -> u64 {
        self.late_ticks.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn tick_at(secs: i64, bid: Decimal, ask: Decimal) -> Tick {
        let ts = Utc.timestamp_opt(secs, 0).unwrap();
        Tick::new("fix", "EURUSD", bid, ask, "lp", ts).unwrap()
    }

    #[test]
    fn test_minute_bars_from_mid_prices() {
        let cache = OhlcCache::new(vec![Timeframe::M1], 100);

        cache.update_from_tick(&tick_at(0, dec!(1.0850), dec!(1.0852)));
        cache.update_from_tick(&tick_at(30, dec!(1.0855), dec!(1.0857)));
        cache.update_from_tick(&tick_at(65, dec!(1.0845), dec!(1.0847)));

        let bars = cache.get_bars("EURUSD", Timeframe::M1, 10);
        assert_eq!(bars.len(), 2);

        let first = &bars[0];
        assert_eq!(first.open_time, Utc.timestamp_opt(0, 0).unwrap());
        assert_eq!(first.open, dec!(1.0851));
        assert_eq!(first.high, dec!(1.0856));
        assert_eq!(first.low, dec!(1.0851));
        assert_eq!(first.close, dec!(1.0856));
        assert_eq!(first.volume, 2);

        let second = &bars[1];
        assert_eq!(second.open_time, Utc.timestamp_opt(60, 0).unwrap());
        assert_eq!(second.open, dec!(1.0846));
        assert_eq!(second.high, dec!(1.0846));
        assert_eq!(second.low, dec!(1.0846));
        assert_eq!(second.close, dec!(1.0846));
        assert_eq!(second.volume, 1);
    }

    #[test]
    fn test_bar_law_open_close_high_low() {
        let cache = OhlcCache::new(vec![Timeframe::M1], 10);
        let mids = [dec!(1.10), dec!(1.30), dec!(1.05), dec!(1.20)];

        for (i, mid) in mids.iter().enumerate() {
            cache.update_from_tick(&tick_at(i as i64, *mid, *mid));
        }

        let bar = cache.current_bar("EURUSD", Timeframe::M1).unwrap();
        assert_eq!(bar.open, dec!(1.10));
        assert_eq!(bar.close, dec!(1.20));
        assert_eq!(bar.high, dec!(1.30));
        assert_eq!(bar.low, dec!(1.05));
        assert_eq!(bar.volume, 4);
        assert!(bar.low <= bar.open && bar.close <= bar.high);
    }

    #[test]
    fn test_single_open_bar_per_series() {
        let cache = OhlcCache::new(vec![Timeframe::M1, Timeframe::M5], 10);
        for minute in 0..7 {
            cache.update_from_tick(&tick_at(minute * 60, dec!(1.1), dec!(1.1002)));
        }

        let one_min = cache.get_bars("EURUSD", Timeframe::M1, 100);
        assert_eq!(one_min.len(), 7);
        let five_min = cache.get_bars("EURUSD", Timeframe::M5, 100);
        assert_eq!(five_min.len(), 2);
        assert_eq!(five_min[0].volume, 5);
        assert_eq!(five_min[1].volume, 2);
    }

    #[test]
    fn test_count_limits_and_retention() {
        let cache = OhlcCache::new(vec![Timeframe::M1], 3);
        for minute in 0..10 {
            cache.update_from_tick(&tick_at(minute * 60, dec!(1.1), dec!(1.1002)));
        }

        // 3 closed bars retained + the open bar
        let all = cache.get_bars("EURUSD", Timeframe::M1, 100);
        assert_eq!(all.len(), 4);
        assert_eq!(all[3].open_time, Utc.timestamp_opt(540, 0).unwrap());

        let two = cache.get_bars("EURUSD", Timeframe::M1, 2);
        assert_eq!(two.len(), 2);
        assert_eq!(two[1].open_time, Utc.timestamp_opt(540, 0).unwrap());
    }

    #[test]
    fn test_late_tick_ignored() {
        let cache = OhlcCache::new(vec![Timeframe::M1], 10);
        cache.update_from_tick(&tick_at(120, dec!(1.1), dec!(1.1)));
        cache.update_from_tick(&tick_at(30, dec!(2.0), dec!(2.0)));

        let bars = cache.get_bars("EURUSD", Timeframe::M1, 10);
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].high, dec!(1.1));
        assert_eq!(cache.late_ticks(), 1);
    }

    #[test]
    fn test_rebuild_from_ticks() {
        let cache = OhlcCache::new(vec![Timeframe::M1], 10);
        cache.update_from_tick(&tick_at(0, dec!(9.0), dec!(9.0)));

        let ticks = vec![
            tick_at(0, dec!(1.0), dec!(1.0)),
            tick_at(10, dec!(1.5), dec!(1.5)),
        ];
        cache.rebuild_from_ticks("EURUSD", &ticks);

        let bars = cache.get_bars("EURUSD", Timeframe::M1, 10);
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].open, dec!(1.0));
        assert_eq!(bars[0].close, dec!(1.5));
        assert_eq!(bars[0].volume, 2);
    }
}
