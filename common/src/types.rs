//! Core domain types shared by the execution services

use serde::{Deserialize, Serialize};
use std::fmt;

/// Instrument classes a broker or venue can support
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentClass {
    /// Listed cash equities
    Equity,
    /// Listed options
    Option,
    /// Listed futures
    Future,
    /// Spot foreign exchange
    Forex,
    /// Crypto spot pairs
    Crypto,
}

impl InstrumentClass {
    /// Stable lowercase name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Equity => "equity",
            Self::Option => "option",
            Self::Future => "future",
            Self::Forex => "forex",
            Self::Crypto => "crypto",
        }
    }
}

impl fmt::Display for InstrumentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const FIAT_CODES: [&str; 10] = [
    "USD", "EUR", "GBP", "JPY", "CHF", "AUD", "CAD", "NZD", "SEK", "NOK",
];

const CRYPTO_QUOTES: [&str; 3] = ["USDT", "USDC", "BUSD"];

/// Instrument symbol (ticker) as supplied by callers
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Symbol(pub String);

impl Symbol {
    /// Create a new symbol, normalising surrounding whitespace and case
    pub fn new(ticker: impl Into<String>) -> Self {
        Self(ticker.into().trim().to_ascii_uppercase())
    }

    /// Ticker text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the ticker is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Derive the instrument class from the ticker shape.
    ///
    /// Returns `None` for tickers that match no known convention.
    #[must_use]
    pub fn instrument_class(&self) -> Option<InstrumentClass> {
        let s = self.0.as_str();
        if s.is_empty() || !s.is_ascii() {
            return None;
        }

        if CRYPTO_QUOTES
            .iter()
            .any(|quote| s.len() > quote.len() && s.ends_with(quote))
        {
            return Some(InstrumentClass::Crypto);
        }
        if let Some((base, quote)) = s.split_once('-') {
            if is_alpha(base) && (quote == "USD" || CRYPTO_QUOTES.contains(&quote)) {
                return Some(InstrumentClass::Crypto);
            }
        }

        if let Some((base, quote)) = s.split_once('/') {
            if FIAT_CODES.contains(&base) && FIAT_CODES.contains(&quote) {
                return Some(InstrumentClass::Forex);
            }
            if base.is_empty() && is_alpha(quote) && quote.len() <= 3 {
                // CME root style, e.g. "/ES"
                return Some(InstrumentClass::Future);
            }
            return None;
        }
        if s.len() == 6 && FIAT_CODES.contains(&&s[..3]) && FIAT_CODES.contains(&&s[3..]) {
            return Some(InstrumentClass::Forex);
        }

        if let Some(root) = s.strip_suffix("=F") {
            if is_alpha(root) {
                return Some(InstrumentClass::Future);
            }
            return None;
        }

        if is_occ_option(s) {
            return Some(InstrumentClass::Option);
        }

        let (root, class_suffix) = match s.split_once('.') {
            Some((root, suffix)) => (root, Some(suffix)),
            None => (s, None),
        };
        let suffix_ok = class_suffix.is_none_or(|c| c.len() == 1 && is_alpha(c));
        if (1..=5).contains(&root.len()) && is_alpha(root) && suffix_ok {
            return Some(InstrumentClass::Equity);
        }

        None
    }
}

fn is_alpha(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_uppercase())
}

/// OCC option symbology: root (1-6 letters), YYMMDD, C/P, 8-digit strike.
fn is_occ_option(s: &str) -> bool {
    if s.len() < 16 {
        return false;
    }
    let (root, tail) = s.split_at(s.len() - 15);
    let bytes = tail.as_bytes();
    is_alpha(root)
        && root.len() <= 6
        && bytes[..6].iter().all(u8::is_ascii_digit)
        && matches!(bytes[6], b'C' | b'P')
        && bytes[7..].iter().all(u8::is_ascii_digit)
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// Buy
    Buy,
    /// Sell
    Sell,
}

impl Side {
    /// +1 for buys, -1 for sells
    #[must_use]
    pub const fn sign(&self) -> f64 {
        match self {
            Self::Buy => 1.0,
            Self::Sell => -1.0,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => f.write_str("buy"),
            Self::Sell => f.write_str("sell"),
        }
    }
}

/// Price type with f64 precision
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Px(pub f64);

impl Px {
    /// Zero price
    pub const ZERO: Self = Self(0.0);

    /// Create a new Price
    #[must_use]
    pub const fn new(value: f64) -> Self {
        Self(value)
    }

    /// Get the price as f64
    #[must_use]
    pub const fn as_f64(&self) -> f64 {
        self.0
    }

    /// Finite and strictly positive
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.0.is_finite() && self.0 > 0.0
    }
}

impl fmt::Display for Px {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}", self.0)
    }
}

/// Quantity type for order sizes
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Qty(pub f64);

impl Qty {
    /// Zero quantity
    pub const ZERO: Self = Self(0.0);

    /// Create a new Quantity
    #[must_use]
    pub const fn new(value: f64) -> Self {
        Self(value)
    }

    /// Get the quantity as f64
    #[must_use]
    pub const fn as_f64(&self) -> f64 {
        self.0
    }

    /// Finite and strictly positive
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.0.is_finite() && self.0 > 0.0
    }

    /// Strictly greater than zero
    #[must_use]
    pub fn is_positive(&self) -> bool {
        self.0 > 0.0
    }
}

impl std::ops::Add for Qty {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Qty {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl fmt::Display for Qty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}", self.0)
    }
}
