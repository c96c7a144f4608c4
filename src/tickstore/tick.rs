use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::StoreError;

/// A single bid/ask observation for a symbol
///
/// Immutable once constructed. `Tick::new` is the only way to build one from live
/// data and it rejects crossed quotes, so every stored tick satisfies `bid <= ask`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(try_from = "TickRecord")]
pub struct Tick {
    /// Source/broker tag of the session that produced the tick
    source: String,
    symbol: String,
    #[schema(value_type = String, example = "1.08500")]
    bid: Decimal,
    #[schema(value_type = String, example = "1.08520")]
    ask: Decimal,
    /// ask - bid
    #[schema(value_type = String, example = "0.00020")]
    spread: Decimal,
    /// Capture time
    timestamp: DateTime<Utc>,
    /// Liquidity provider tag
    lp: String,
}

/// Wire/disk shape of a tick; converted through `Tick::new` so decoded ticks are validated too
#[derive(Deserialize)]
struct TickRecord {
    source: String,
    symbol: String,
    bid: Decimal,
    ask: Decimal,
    spread: Decimal,
    timestamp: DateTime<Utc>,
    lp: String,
}

impl TryFrom<TickRecord> for Tick {
    type Error = StoreError;

    fn try_from(record: TickRecord) -> Result<Self, Self::Error> {
        if record.spread != record.ask - record.bid {
            return Err(StoreError::InvalidTick(format!(
                "{}: spread {} does not match ask - bid",
                record.symbol, record.spread
            )));
        }
        Tick::new(
            record.source,
            record.symbol,
            record.bid,
            record.ask,
            record.lp,
            record.timestamp,
        )
    }
}

impl Tick {
    pub fn new(
        source: impl Into<String>,
        symbol: impl Into<String>,
        bid: Decimal,
        ask: Decimal,
        lp: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, StoreError> {
        let symbol = symbol.into();

        if symbol.is_empty() {
            return Err(StoreError::InvalidTick("empty symbol".to_string()));
        }
        if bid <= Decimal::ZERO || ask <= Decimal::ZERO {
            return Err(StoreError::InvalidTick(format!(
                "{}: non-positive price (bid {}, ask {})",
                symbol, bid, ask
            )));
        }
        if bid > ask {
            return Err(StoreError::InvalidTick(format!(
                "{}: crossed quote (bid {} > ask {})",
                symbol, bid, ask
            )));
        }

        Ok(Self {
            source: source.into(),
            symbol,
            bid,
            ask,
            spread: ask - bid,
            timestamp,
            lp: lp.into(),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn bid(&self) -> Decimal {
        self.bid
    }

    pub fn ask(&self) -> Decimal {
        self.ask
    }

    pub fn spread(&self) -> Decimal {
        self.spread
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn lp(&self) -> &str {
        &self.lp
    }

    /// (bid + ask) / 2
    pub fn mid_price(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::from(2)
    }

    /// Mid price as f64 for ratio math (throttle decisions only)
    pub fn mid_f64(&self) -> f64 {
        self.mid_price().to_f64().unwrap_or(0.0)
    }

    /// UTC calendar day the tick belongs to (segment partition key)
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }
}
