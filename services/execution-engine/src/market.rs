//! Reference prices and order book synthesis
//!
//! The engine has no market data feed. Prices come from a [`QuoteSource`];
//! the default [`SyntheticQuotes`] derives a stable price from the symbol and
//! lets callers pin explicit prices.

use chrono::{DateTime, Utc};
use common::constants::BASIS_POINTS;
use common::{InstrumentClass, Px, Side, Symbol};
use dashmap::DashMap;
use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

use crate::catalog::Venue;

/// Number of levels on each side of a synthesized book
pub const BOOK_DEPTH: usize = 5;

const DEFAULT_SPREAD_BPS: f64 = 2.0;
const DEFAULT_DAILY_VOLUME: f64 = 1_000_000.0;

/// Source of reference prices
pub trait QuoteSource: Send + Sync {
    /// Current reference (mid) price for a symbol
    fn reference_price(&self, symbol: &Symbol) -> Px;
}

/// Deterministic quotes keyed by symbol, with explicit overrides
#[derive(Debug, Default)]
pub struct SyntheticQuotes {
    overrides: DashMap<Symbol, Px>,
}

impl SyntheticQuotes {
    /// Empty override table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin the reference price of a symbol
    pub fn set_price(&self, symbol: &Symbol, price: Px) {
        self.overrides.insert(symbol.clone(), price);
    }

    /// Remove a pinned price
    pub fn clear_price(&self, symbol: &Symbol) {
        self.overrides.remove(symbol);
    }

    fn derived_price(symbol: &Symbol) -> Px {
        let mut hasher = FxHasher::default();
        symbol.as_str().hash(&mut hasher);
        // 0..=9999, spread over a class-typical range
        #[allow(clippy::cast_precision_loss)]
        let bucket = (hasher.finish() % 10_000) as f64 / 10_000.0;
        let price = match symbol.instrument_class() {
            Some(InstrumentClass::Forex) => 0.5 + bucket * 1.5,
            Some(InstrumentClass::Crypto) => 1.0 + bucket * 4_999.0,
            Some(InstrumentClass::Option) => 0.5 + bucket * 49.5,
            Some(InstrumentClass::Future) => 50.0 + bucket * 4_950.0,
            Some(InstrumentClass::Equity) | None => 10.0 + bucket * 490.0,
        };
        Px::new((price * 100.0).round() / 100.0)
    }
}

impl QuoteSource for SyntheticQuotes {
    fn reference_price(&self, symbol: &Symbol) -> Px {
        self.overrides
            .get(symbol)
            .map_or_else(|| Self::derived_price(symbol), |px| *px)
    }
}

/// Two-sided quote around a reference price
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub bid: Px,
    pub ask: Px,
    pub mid: Px,
}

impl Quote {
    /// Quote with the given full spread in basis points
    #[must_use]
    pub fn around(mid: Px, spread_bps: f64) -> Self {
        let half = mid.as_f64() * spread_bps / 2.0 / BASIS_POINTS;
        Self {
            bid: Px::new(mid.as_f64() - half),
            ask: Px::new(mid.as_f64() + half),
            mid,
        }
    }

    /// Quote at a venue's average spread
    #[must_use]
    pub fn at_venue(mid: Px, venue: Option<&Venue>) -> Self {
        Self::around(mid, venue.map_or(DEFAULT_SPREAD_BPS, |v| v.avg_spread_bps))
    }

    /// Price a marketable order on `side` expects to pay or receive
    #[must_use]
    pub const fn for_side(&self, side: Side) -> Px {
        match side {
            Side::Buy => self.ask,
            Side::Sell => self.bid,
        }
    }
}

/// One book level
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Px,
    pub size: f64,
}

/// Depth snapshot for a symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub symbol: Symbol,
    pub venue_id: Option<String>,
    pub reference_price: Px,
    /// Best bid first
    pub bids: Vec<BookLevel>,
    /// Best ask first
    pub asks: Vec<BookLevel>,
    pub timestamp: DateTime<Utc>,
}

impl OrderBookSnapshot {
    /// Build a book around `mid` shaped by the venue's spread and volume
    #[must_use]
    pub fn synthesize(
        symbol: Symbol,
        mid: Px,
        venue: Option<&Venue>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let spread_bps = venue.map_or(DEFAULT_SPREAD_BPS, |v| v.avg_spread_bps);
        let daily_volume = venue.map_or(DEFAULT_DAILY_VOLUME, |v| v.avg_daily_volume);
        let step_bps = spread_bps.max(1.0);
        let top = Quote::around(mid, spread_bps);

        let mut bids = Vec::with_capacity(BOOK_DEPTH);
        let mut asks = Vec::with_capacity(BOOK_DEPTH);
        for level in 0..BOOK_DEPTH {
            #[allow(clippy::cast_precision_loss)]
            let depth = level as f64;
            let offset = mid.as_f64() * step_bps * depth / BASIS_POINTS;
            let size = (daily_volume * 1e-4 * (1.0 + depth * 0.5)).round().max(1.0);
            bids.push(BookLevel {
                price: Px::new(top.bid.as_f64() - offset),
                size,
            });
            asks.push(BookLevel {
                price: Px::new(top.ask.as_f64() + offset),
                size,
            });
        }

        Self {
            symbol,
            venue_id: venue.map(|v| v.id.clone()),
            reference_price: mid,
            bids,
            asks,
            timestamp,
        }
    }

    /// Best bid and ask
    #[must_use]
    pub fn top(&self) -> Option<(Px, Px)> {
        Some((self.bids.first()?.price, self.asks.first()?.price))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;

    #[test]
    fn test_derived_price_is_stable() {
        let quotes = SyntheticQuotes::new();
        let symbol = Symbol::new("AAPL");
        let first = quotes.reference_price(&symbol);
        assert_eq!(first, quotes.reference_price(&symbol));
        assert!((10.0..=500.0).contains(&first.as_f64()));
    }

    #[test]
    fn test_override_wins() {
        let quotes = SyntheticQuotes::new();
        let symbol = Symbol::new("MSFT");
        quotes.set_price(&symbol, Px::new(321.0));
        assert_eq!(quotes.reference_price(&symbol), Px::new(321.0));
        quotes.clear_price(&symbol);
        assert_ne!(quotes.reference_price(&symbol), Px::new(321.0));
    }

    #[test]
    fn test_quote_is_adverse_to_side() {
        let quote = Quote::around(Px::new(100.0), 10.0);
        assert!((quote.for_side(Side::Buy).as_f64() - 100.05).abs() < 1e-9);
        assert!((quote.for_side(Side::Sell).as_f64() - 99.95).abs() < 1e-9);
    }

    #[test]
    fn test_synthesized_book_is_ordered() {
        let catalog = Catalog::builtin();
        let book = OrderBookSnapshot::synthesize(
            Symbol::new("AAPL"),
            Px::new(200.0),
            catalog.venue("NYSE"),
            Utc::now(),
        );
        assert_eq!(book.bids.len(), BOOK_DEPTH);
        assert_eq!(book.asks.len(), BOOK_DEPTH);
        assert!(book.bids.windows(2).all(|w| w[0].price > w[1].price));
        assert!(book.asks.windows(2).all(|w| w[0].price < w[1].price));
        let (bid, ask) = book.top().unwrap();
        assert!(bid < ask);
        assert_eq!(book.venue_id.as_deref(), Some("NYSE"));
    }
}
