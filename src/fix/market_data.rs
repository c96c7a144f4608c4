use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;

use crate::error::StoreError;
use crate::tickstore::Tick;

/// MDEntryType (269)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MdEntryType {
    Bid,
    Offer,
}

impl MdEntryType {
    pub fn from_fix(value: &str) -> Option<Self> {
        match value {
            "0" => Some(Self::Bid),
            "1" => Some(Self::Offer),
            _ => None,
        }
    }
}

/// MDUpdateAction (279); snapshots carry no action and are treated as `New`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MdUpdateAction {
    New,
    Change,
    Delete,
}

impl MdUpdateAction {
    pub fn from_fix(value: &str) -> Option<Self> {
        match value {
            "0" => Some(Self::New),
            "1" => Some(Self::Change),
            "2" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// One entry of the NoMDEntries (268) repeating group
#[derive(Debug, Clone, PartialEq)]
pub struct MarketDataEntry {
    /// Per-entry symbol (incremental refresh); falls back to the message symbol
    pub symbol: Option<String>,
    pub entry_type: MdEntryType,
    pub price: Option<Decimal>,
    pub action: MdUpdateAction,
}

/// Parsed W or X body
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketDataUpdate {
    pub md_req_id: Option<String>,
    /// Message-level symbol (before the entries group)
    pub symbol: Option<String>,
    pub entries: Vec<MarketDataEntry>,
}

impl MarketDataUpdate {
    /// Symbol an entry applies to
    pub fn entry_symbol<'a>(&'a self, entry: &'a MarketDataEntry) -> Option<&'a str> {
        entry.symbol.as_deref().or(self.symbol.as_deref())
    }
}

/// Accumulates the fields of one group entry
#[derive(Default)]
struct EntryBuilder {
    symbol: Option<String>,
    entry_type: Option<MdEntryType>,
    price: Option<Decimal>,
    action: Option<MdUpdateAction>,
    started: bool,
}

impl EntryBuilder {
    fn try_build(&self) -> Option<MarketDataEntry> {
        let entry_type = self.entry_type?;
        let action = self.action.unwrap_or(MdUpdateAction::New);
        if self.price.is_none() && action != MdUpdateAction::Delete {
            return None;
        }
        Some(MarketDataEntry {
            symbol: self.symbol.clone(),
            entry_type,
            price: self.price,
            action,
        })
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Parse the market data fields of a W or X message
///
/// The first tag after NoMDEntries (268) delimits group entries, as the FIX repeating
/// group rules require; 55 inside the group belongs to the entry.
pub fn parse_market_data(fields: &[(u32, &str)]) -> MarketDataUpdate {
    let mut update = MarketDataUpdate::default();
    let mut builder = EntryBuilder::default();
    let mut in_group = false;
    let mut delimiter: Option<u32> = None;

    for &(tag, value) in fields {
        match tag {
            262 => update.md_req_id = Some(value.to_string()),
            268 => in_group = true,
            _ if !in_group => {
                if tag == 55 {
                    update.symbol = Some(value.to_string());
                }
            }
            10 => {}
            _ => {
                let delim = *delimiter.get_or_insert(tag);
                if tag == delim && builder.started {
                    if let Some(entry) = builder.try_build() {
                        update.entries.push(entry);
                    }
                    builder.reset();
                }
                builder.started = true;

                match tag {
                    55 => builder.symbol = Some(value.to_string()),
                    269 => builder.entry_type = MdEntryType::from_fix(value),
                    270 => builder.price = Decimal::from_str(value).ok(),
                    279 => builder.action = MdUpdateAction::from_fix(value),
                    _ => {}
                }
            }
        }
    }

    if let Some(entry) = builder.try_build() {
        update.entries.push(entry);
    }

    update
}

/// Last known two-sided quote for a symbol
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Quote {
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
}

impl Quote {
    fn apply(&mut self, entry: &MarketDataEntry) {
        let value = match entry.action {
            MdUpdateAction::Delete => None,
            MdUpdateAction::New | MdUpdateAction::Change => entry.price,
        };
        match entry.entry_type {
            MdEntryType::Bid => self.bid = value,
            MdEntryType::Offer => self.ask = value,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.bid.is_some() && self.ask.is_some()
    }
}

/// Merges one-sided incremental updates with the last known quote per symbol
#[derive(Debug, Default)]
pub struct QuoteBook {
    quotes: HashMap<String, Quote>,
}

impl QuoteBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// A snapshot replaces both sides of every symbol it mentions
    pub fn apply_snapshot(&mut self, update: &MarketDataUpdate) -> Vec<(String, Quote)> {
        let mut fresh: Vec<(String, Quote)> = Vec::new();

        for entry in &update.entries {
            let Some(symbol) = update.entry_symbol(entry) else {
                continue;
            };
            match fresh.iter_mut().find(|(s, _)| s == symbol) {
                Some((_, quote)) => quote.apply(entry),
                None => {
                    let mut quote = Quote::default();
                    quote.apply(entry);
                    fresh.push((symbol.to_string(), quote));
                }
            }
        }

        // A snapshot with no entries still clears the mentioned symbol
        if fresh.is_empty() {
            if let Some(symbol) = &update.symbol {
                fresh.push((symbol.clone(), Quote::default()));
            }
        }

        for (symbol, quote) in &fresh {
            self.quotes.insert(symbol.clone(), *quote);
        }
        fresh
    }

    /// Apply entries in order; returns each touched symbol once with its merged quote
    pub fn apply_incremental(&mut self, update: &MarketDataUpdate) -> Vec<(String, Quote)> {
        let mut touched: Vec<String> = Vec::new();

        for entry in &update.entries {
            let Some(symbol) = update.entry_symbol(entry) else {
                tracing::debug!("Market data entry without symbol ignored");
                continue;
            };
            self.quotes.entry(symbol.to_string()).or_default().apply(entry);
            if !touched.iter().any(|s| s == symbol) {
                touched.push(symbol.to_string());
            }
        }

        touched
            .into_iter()
            .map(|symbol| {
                let quote = self.quotes.get(&symbol).copied().unwrap_or_default();
                (symbol, quote)
            })
            .collect()
    }

    pub fn get(&self, symbol: &str) -> Option<Quote> {
        self.quotes.get(symbol).copied()
    }

    pub fn remove(&mut self, symbol: &str) {
        self.quotes.remove(symbol);
    }

    pub fn clear(&mut self) {
        self.quotes.clear();
    }
}

/// Turn a merged quote into a tick; `Ok(None)` while a side is still unknown
pub fn build_tick(
    symbol: &str,
    quote: Quote,
    source: &str,
    lp: &str,
    timestamp: DateTime<Utc>,
) -> Result<Option<Tick>, StoreError> {
    match (quote.bid, quote.ask) {
        (Some(bid), Some(ask)) => Tick::new(source, symbol, bid, ask, lp, timestamp).map(Some),
        _ => Ok(None),
    }
}
