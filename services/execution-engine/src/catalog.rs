//! Broker, venue and algorithm catalog
//!
//! The catalog is read-mostly: routing works on an `Arc<Catalog>` snapshot so
//! a proposal is always computed against one consistent view.

use chrono::{DateTime, NaiveTime, Timelike, Utc};
use common::InstrumentClass;
use common::constants::BASIS_POINTS;
use parking_lot::RwLock;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::error::{ExecutionError, ExecutionResult};
use crate::order::{OrderType, TimeInForce};

/// How a broker prices a fill
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum CommissionModel {
    /// Flat amount per unit traded
    PerUnit { rate: f64 },
    /// Basis points of notional
    Bps { rate_bps: f64 },
}

/// Commission schedule for one instrument class
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CommissionSchedule {
    #[serde(flatten)]
    pub model: CommissionModel,
    /// Per-order floor
    #[serde(default)]
    pub minimum: f64,
}

impl CommissionSchedule {
    /// Per-unit schedule
    #[must_use]
    pub const fn per_unit(rate: f64, minimum: f64) -> Self {
        Self {
            model: CommissionModel::PerUnit { rate },
            minimum,
        }
    }

    /// Basis-point schedule
    #[must_use]
    pub const fn bps(rate_bps: f64, minimum: f64) -> Self {
        Self {
            model: CommissionModel::Bps { rate_bps },
            minimum,
        }
    }

    /// Commission before the minimum is applied
    #[must_use]
    pub fn raw(&self, quantity: f64, price: f64) -> f64 {
        match self.model {
            CommissionModel::PerUnit { rate } => rate * quantity,
            CommissionModel::Bps { rate_bps } => quantity * price * rate_bps / BASIS_POINTS,
        }
    }

    /// Commission for one order-sized ticket
    #[must_use]
    pub fn charge(&self, quantity: f64, price: f64) -> f64 {
        self.raw(quantity, price).max(self.minimum)
    }
}

/// Broker definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Broker {
    /// Broker ID
    pub id: String,
    /// Display name
    pub name: String,
    /// Instrument classes offered
    pub instrument_classes: Vec<InstrumentClass>,
    /// Supported order types
    pub order_types: Vec<OrderType>,
    /// Supported time in force
    pub time_in_force: Vec<TimeInForce>,
    /// Commission per instrument class
    pub commissions: BTreeMap<InstrumentClass, CommissionSchedule>,
    /// Typical round-trip latency (milliseconds)
    pub latency_ms: u64,
    /// Probability an instruction is acknowledged (0-1)
    pub reliability: f64,
    /// Relative depth of liquidity access (0-1)
    pub liquidity_score: f64,
    /// Is active
    pub active: bool,
}

impl Broker {
    /// Offers the instrument class
    #[must_use]
    pub fn supports_class(&self, class: InstrumentClass) -> bool {
        self.instrument_classes.contains(&class)
    }

    /// Accepts the order type
    #[must_use]
    pub fn supports_order_type(&self, order_type: OrderType) -> bool {
        self.order_types.contains(&order_type)
    }

    /// Accepts the time in force
    #[must_use]
    pub fn supports_time_in_force(&self, tif: TimeInForce) -> bool {
        self.time_in_force.contains(&tif)
    }

    /// Commission for a ticket; zero for classes without a schedule
    #[must_use]
    pub fn commission(&self, class: InstrumentClass, quantity: f64, price: f64) -> f64 {
        self.commissions
            .get(&class)
            .map_or(0.0, |schedule| schedule.charge(quantity, price))
    }

    /// Commission for a partial fill of an order; the minimum applies to the
    /// first fill only
    #[must_use]
    pub fn fill_commission(
        &self,
        class: InstrumentClass,
        quantity: f64,
        price: f64,
        already_charged: f64,
    ) -> f64 {
        let Some(schedule) = self.commissions.get(&class) else {
            return 0.0;
        };
        let raw = schedule.raw(quantity, price);
        if already_charged >= schedule.minimum {
            raw
        } else {
            raw.max(schedule.minimum - already_charged)
        }
    }
}

/// Venue type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VenueType {
    /// Lit exchange
    Exchange,
    /// Dark pool
    DarkPool,
    /// Electronic communication network
    Ecn,
    /// Alternative trading system
    Ats,
}

/// Daily session in UTC; `open == close` means around the clock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingHours {
    /// Session open
    pub open: NaiveTime,
    /// Session close
    pub close: NaiveTime,
}

impl TradingHours {
    /// Session from hour/minute pairs; invalid times collapse to midnight
    #[must_use]
    pub fn hm(open: (u32, u32), close: (u32, u32)) -> Self {
        Self {
            open: NaiveTime::from_hms_opt(open.0, open.1, 0).unwrap_or(NaiveTime::MIN),
            close: NaiveTime::from_hms_opt(close.0, close.1, 0).unwrap_or(NaiveTime::MIN),
        }
    }

    /// Always open
    #[must_use]
    pub const fn always() -> Self {
        Self {
            open: NaiveTime::MIN,
            close: NaiveTime::MIN,
        }
    }

    /// Whether the session is open at `at`
    #[must_use]
    pub fn is_open(&self, at: DateTime<Utc>) -> bool {
        let t = at.time();
        if self.open == self.close {
            true
        } else if self.open < self.close {
            t >= self.open && t < self.close
        } else {
            t >= self.open || t < self.close
        }
    }

    /// Session length in seconds
    #[must_use]
    pub fn session_secs(&self) -> f64 {
        let open = f64::from(self.open.num_seconds_from_midnight());
        let close = f64::from(self.close.num_seconds_from_midnight());
        if self.open == self.close {
            86_400.0
        } else if close > open {
            close - open
        } else {
            86_400.0 - open + close
        }
    }
}

/// Venue definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Venue {
    /// Venue ID
    pub id: String,
    /// Display name
    pub name: String,
    /// Venue type
    pub venue_type: VenueType,
    /// Instrument classes listed
    pub instrument_classes: Vec<InstrumentClass>,
    /// Trading hours
    pub hours: TradingHours,
    /// Maker fee (basis points)
    pub maker_fee_bps: f64,
    /// Taker fee (basis points)
    pub taker_fee_bps: f64,
    /// Average quoted spread (basis points)
    pub avg_spread_bps: f64,
    /// Typical daily volume per listed instrument
    pub avg_daily_volume: f64,
    /// Share of consolidated volume (0-1)
    pub market_share: f64,
    /// Is active
    pub active: bool,
}

impl Venue {
    /// Lists the instrument class
    #[must_use]
    pub fn lists_class(&self, class: InstrumentClass) -> bool {
        self.instrument_classes.contains(&class)
    }
}

/// Tunables of an execution algorithm
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmParameters {
    /// Default horizon (minutes)
    pub duration_minutes: Option<u32>,
    /// Lowest participation rate
    pub participation_min: Option<f64>,
    /// Highest participation rate
    pub participation_max: Option<f64>,
    /// Urgency (0-1)
    pub urgency: Option<f64>,
    /// Risk aversion (0-1)
    pub risk_aversion: Option<f64>,
    /// Randomize slice sizes and timing
    #[serde(default)]
    pub randomization: bool,
    /// Named intraday volume profile
    pub volume_profile: Option<String>,
}

/// Execution algorithm definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionAlgorithm {
    /// Algorithm name
    pub name: String,
    /// Description
    pub description: String,
    /// Default parameters
    pub parameters: AlgorithmParameters,
}

/// Brokers, venues and algorithms known to the engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub brokers: Vec<Broker>,
    pub venues: Vec<Venue>,
    pub algorithms: Vec<ExecutionAlgorithm>,
}

impl Catalog {
    /// Broker by ID
    #[must_use]
    pub fn broker(&self, id: &str) -> Option<&Broker> {
        self.brokers.iter().find(|b| b.id == id)
    }

    /// Venue by ID
    #[must_use]
    pub fn venue(&self, id: &str) -> Option<&Venue> {
        self.venues.iter().find(|v| v.id == id)
    }

    /// Algorithm by name
    #[must_use]
    pub fn algorithm(&self, name: &str) -> Option<&ExecutionAlgorithm> {
        self.algorithms.iter().find(|a| a.name == name)
    }

    /// Parse and validate a JSON catalog
    pub fn from_json(json: &str) -> ExecutionResult<Self> {
        let catalog: Self = serde_json::from_str(json).map_err(|e| ExecutionError::Catalog {
            reason: e.to_string(),
        })?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Load a JSON catalog from disk
    pub fn load(path: impl AsRef<Path>) -> ExecutionResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| ExecutionError::Catalog {
            reason: format!("{}: {e}", path.display()),
        })?;
        let catalog = Self::from_json(&json)?;
        info!(
            "Loaded catalog from {}: {} brokers, {} venues, {} algorithms",
            path.display(),
            catalog.brokers.len(),
            catalog.venues.len(),
            catalog.algorithms.len()
        );
        Ok(catalog)
    }

    /// Check IDs are unique and weights are within range
    pub fn validate(&self) -> ExecutionResult<()> {
        let fail = |reason: String| Err(ExecutionError::Catalog { reason });

        let mut seen = FxHashSet::default();
        for broker in &self.brokers {
            if !seen.insert(broker.id.as_str()) {
                return fail(format!("duplicate broker id {}", broker.id));
            }
            if !(0.0..=1.0).contains(&broker.reliability) {
                return fail(format!("broker {} reliability out of range", broker.id));
            }
        }
        seen.clear();
        for venue in &self.venues {
            if !seen.insert(venue.id.as_str()) {
                return fail(format!("duplicate venue id {}", venue.id));
            }
            if !(0.0..=1.0).contains(&venue.market_share) {
                return fail(format!("venue {} market share out of range", venue.id));
            }
            if venue.avg_spread_bps < 0.0 || venue.avg_daily_volume < 0.0 {
                return fail(format!("venue {} has negative spread or volume", venue.id));
            }
        }
        seen.clear();
        for algorithm in &self.algorithms {
            if !seen.insert(algorithm.name.as_str()) {
                return fail(format!("duplicate algorithm {}", algorithm.name));
            }
        }
        Ok(())
    }

    /// Built-in catalog used when no file is configured
    #[must_use]
    pub fn builtin() -> Self {
        use InstrumentClass::{Crypto, Equity, Forex, Future, Option as Opt};
        use OrderType::{
            Iceberg, Limit, Market, Pov, Stop, StopLimit, TrailingStop, Twap, Vwap,
        };
        use TimeInForce::{Day, Fok, Gtc, Gtd, Ioc};

        let all_types = vec![
            Market, Limit, Stop, StopLimit, TrailingStop, Iceberg, Twap, Vwap, Pov,
        ];
        let all_tif = vec![Gtc, Ioc, Fok, Day, Gtd];

        let brokers = vec![
            Broker {
                id: "interactive_brokers".into(),
                name: "Interactive Brokers".into(),
                instrument_classes: vec![Equity, Opt, Future, Forex],
                order_types: all_types.clone(),
                time_in_force: all_tif.clone(),
                commissions: BTreeMap::from([
                    (Equity, CommissionSchedule::per_unit(0.005, 1.0)),
                    (Opt, CommissionSchedule::per_unit(0.65, 1.0)),
                    (Future, CommissionSchedule::per_unit(0.85, 0.85)),
                    (Forex, CommissionSchedule::bps(0.2, 2.0)),
                ]),
                latency_ms: 15,
                reliability: 0.98,
                liquidity_score: 0.95,
                active: true,
            },
            Broker {
                id: "alpaca".into(),
                name: "Alpaca".into(),
                instrument_classes: vec![Equity, Crypto],
                order_types: vec![Market, Limit, Stop, StopLimit, TrailingStop],
                time_in_force: vec![Gtc, Ioc, Fok, Day],
                commissions: BTreeMap::from([
                    (Equity, CommissionSchedule::per_unit(0.0, 0.0)),
                    (Crypto, CommissionSchedule::bps(15.0, 0.0)),
                ]),
                latency_ms: 25,
                reliability: 0.95,
                liquidity_score: 0.8,
                active: true,
            },
            Broker {
                id: "schwab".into(),
                name: "Charles Schwab".into(),
                instrument_classes: vec![Equity, Opt],
                order_types: vec![Market, Limit, Stop, StopLimit, TrailingStop, Twap, Vwap],
                time_in_force: all_tif.clone(),
                commissions: BTreeMap::from([
                    (Equity, CommissionSchedule::per_unit(0.0, 0.0)),
                    (Opt, CommissionSchedule::per_unit(0.65, 0.0)),
                ]),
                latency_ms: 30,
                reliability: 0.96,
                liquidity_score: 0.85,
                active: true,
            },
            Broker {
                id: "binance".into(),
                name: "Binance".into(),
                instrument_classes: vec![Crypto],
                order_types: vec![Market, Limit, StopLimit, Iceberg, Twap],
                time_in_force: vec![Gtc, Ioc, Fok],
                commissions: BTreeMap::from([(Crypto, CommissionSchedule::bps(10.0, 0.0))]),
                latency_ms: 10,
                reliability: 0.97,
                liquidity_score: 0.9,
                active: true,
            },
            Broker {
                id: "oanda".into(),
                name: "OANDA".into(),
                instrument_classes: vec![Forex],
                order_types: vec![Market, Limit, Stop, TrailingStop],
                time_in_force: all_tif,
                commissions: BTreeMap::from([(Forex, CommissionSchedule::bps(0.5, 0.0))]),
                latency_ms: 20,
                reliability: 0.97,
                liquidity_score: 0.85,
                active: true,
            },
        ];

        let us_equity_hours = TradingHours::hm((14, 30), (21, 0));
        let venue = |id: &str,
                     name: &str,
                     venue_type: VenueType,
                     classes: Vec<InstrumentClass>,
                     hours: TradingHours,
                     fees: (f64, f64),
                     spread: f64,
                     adv: f64,
                     share: f64| Venue {
            id: id.into(),
            name: name.into(),
            venue_type,
            instrument_classes: classes,
            hours,
            maker_fee_bps: fees.0,
            taker_fee_bps: fees.1,
            avg_spread_bps: spread,
            avg_daily_volume: adv,
            market_share: share,
            active: true,
        };

        let venues = vec![
            venue(
                "NYSE",
                "New York Stock Exchange",
                VenueType::Exchange,
                vec![Equity],
                us_equity_hours,
                (0.1, 0.3),
                2.0,
                8_000_000.0,
                0.25,
            ),
            venue(
                "NASDAQ",
                "Nasdaq",
                VenueType::Exchange,
                vec![Equity],
                us_equity_hours,
                (0.1, 0.3),
                2.0,
                9_000_000.0,
                0.22,
            ),
            venue(
                "ARCA",
                "NYSE Arca",
                VenueType::Ecn,
                vec![Equity],
                us_equity_hours,
                (0.2, 0.3),
                2.5,
                3_000_000.0,
                0.1,
            ),
            venue(
                "SIGMA_X",
                "Sigma X",
                VenueType::DarkPool,
                vec![Equity],
                us_equity_hours,
                (0.1, 0.1),
                1.0,
                1_000_000.0,
                0.05,
            ),
            venue(
                "CBOE",
                "Cboe Options",
                VenueType::Exchange,
                vec![Opt],
                us_equity_hours,
                (0.2, 0.5),
                15.0,
                200_000.0,
                0.3,
            ),
            venue(
                "CME",
                "CME Globex",
                VenueType::Exchange,
                vec![Future],
                TradingHours::hm((23, 0), (22, 0)),
                (0.0, 0.1),
                1.0,
                1_500_000.0,
                0.9,
            ),
            venue(
                "EBS",
                "EBS Market",
                VenueType::Ecn,
                vec![Forex],
                TradingHours::always(),
                (0.0, 0.2),
                0.8,
                50_000_000.0,
                0.3,
            ),
            venue(
                "BINANCE",
                "Binance Spot",
                VenueType::Exchange,
                vec![Crypto],
                TradingHours::always(),
                (1.0, 1.0),
                1.5,
                40_000.0,
                0.45,
            ),
            venue(
                "COINBASE",
                "Coinbase Exchange",
                VenueType::Exchange,
                vec![Crypto],
                TradingHours::always(),
                (4.0, 6.0),
                2.0,
                15_000.0,
                0.2,
            ),
        ];

        let algorithm = |name: &str, description: &str, parameters: AlgorithmParameters| {
            ExecutionAlgorithm {
                name: name.into(),
                description: description.into(),
                parameters,
            }
        };
        let algorithms = vec![
            algorithm(
                "twap",
                "Time-weighted slices evenly spread over the horizon",
                AlgorithmParameters {
                    duration_minutes: Some(30),
                    randomization: true,
                    ..AlgorithmParameters::default()
                },
            ),
            algorithm(
                "vwap",
                "Slices weighted by the intraday volume curve",
                AlgorithmParameters {
                    duration_minutes: Some(60),
                    participation_max: Some(0.2),
                    volume_profile: Some("u_shape".into()),
                    ..AlgorithmParameters::default()
                },
            ),
            algorithm(
                "pov",
                "Tracks a fixed share of market volume",
                AlgorithmParameters {
                    duration_minutes: Some(60),
                    participation_min: Some(0.05),
                    participation_max: Some(0.15),
                    ..AlgorithmParameters::default()
                },
            ),
            algorithm(
                "implementation_shortfall",
                "Front-loads to limit drift from the arrival price",
                AlgorithmParameters {
                    duration_minutes: Some(30),
                    urgency: Some(0.7),
                    risk_aversion: Some(0.5),
                    ..AlgorithmParameters::default()
                },
            ),
            algorithm(
                "arrival_price",
                "Minimises deviation from the arrival price",
                AlgorithmParameters {
                    duration_minutes: Some(20),
                    urgency: Some(0.6),
                    risk_aversion: Some(0.7),
                    ..AlgorithmParameters::default()
                },
            ),
            algorithm(
                "iceberg",
                "Shows a small display quantity and refreshes it",
                AlgorithmParameters {
                    randomization: true,
                    ..AlgorithmParameters::default()
                },
            ),
            algorithm(
                "sniper",
                "Waits for liquidity at the limit and takes it",
                AlgorithmParameters {
                    urgency: Some(0.9),
                    ..AlgorithmParameters::default()
                },
            ),
            algorithm(
                "guerrilla",
                "Randomised opportunistic slicing across venues",
                AlgorithmParameters {
                    duration_minutes: Some(45),
                    participation_max: Some(0.1),
                    randomization: true,
                    ..AlgorithmParameters::default()
                },
            ),
        ];

        Self {
            brokers,
            venues,
            algorithms,
        }
    }
}

/// Shared, swappable catalog
#[derive(Debug)]
pub struct CatalogStore {
    current: RwLock<Arc<Catalog>>,
}

impl CatalogStore {
    /// Wrap a catalog
    #[must_use]
    pub fn new(catalog: Catalog) -> Self {
        Self {
            current: RwLock::new(Arc::new(catalog)),
        }
    }

    /// Consistent view for one operation
    #[must_use]
    pub fn snapshot(&self) -> Arc<Catalog> {
        Arc::clone(&self.current.read())
    }

    /// Replace the whole catalog
    pub fn replace(&self, catalog: Catalog) -> ExecutionResult<()> {
        catalog.validate()?;
        *self.current.write() = Arc::new(catalog);
        Ok(())
    }

    /// Enable or disable a broker
    pub fn set_broker_active(&self, broker_id: &str, active: bool) -> ExecutionResult<()> {
        let mut guard = self.current.write();
        let catalog = Arc::make_mut(&mut guard);
        let broker = catalog
            .brokers
            .iter_mut()
            .find(|b| b.id == broker_id)
            .ok_or_else(|| ExecutionError::BrokerNotFound {
                broker: broker_id.to_string(),
            })?;
        broker.active = active;
        info!("Broker {} active={}", broker_id, active);
        Ok(())
    }

    /// Enable or disable a venue
    pub fn set_venue_active(&self, venue_id: &str, active: bool) -> ExecutionResult<()> {
        let mut guard = self.current.write();
        let catalog = Arc::make_mut(&mut guard);
        let venue = catalog
            .venues
            .iter_mut()
            .find(|v| v.id == venue_id)
            .ok_or_else(|| ExecutionError::VenueNotFound {
                venue: venue_id.to_string(),
            })?;
        venue.active = active;
        info!("Venue {} active={}", venue_id, active);
        Ok(())
    }
}

impl Default for CatalogStore {
    fn default() -> Self {
        Self::new(Catalog::builtin())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_builtin_catalog_is_valid() {
        let catalog = Catalog::builtin();
        assert!(catalog.validate().is_ok());
        assert_eq!(catalog.algorithms.len(), 8);
        assert!(catalog.broker("alpaca").is_some());
        assert!(catalog.venue("NYSE").is_some());
        assert!(catalog.algorithm("implementation_shortfall").is_some());
    }

    #[test]
    fn test_commission_schedules() {
        let per_unit = CommissionSchedule::per_unit(0.005, 1.0);
        assert_eq!(per_unit.charge(100.0, 50.0), 1.0);
        assert!((per_unit.charge(1000.0, 50.0) - 5.0).abs() < 1e-12);

        let bps = CommissionSchedule::bps(10.0, 0.0);
        assert!((bps.charge(2.0, 30_000.0) - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_fill_commission_minimum_applies_once() {
        let catalog = Catalog::builtin();
        let ib = catalog.broker("interactive_brokers").unwrap();
        let first = ib.fill_commission(InstrumentClass::Equity, 10.0, 100.0, 0.0);
        assert_eq!(first, 1.0);
        let second = ib.fill_commission(InstrumentClass::Equity, 10.0, 100.0, first);
        assert!((second - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_trading_hours() {
        let regular = TradingHours::hm((14, 30), (21, 0));
        assert!(regular.is_open(Utc.with_ymd_and_hms(2024, 1, 2, 15, 0, 0).unwrap()));
        assert!(!regular.is_open(Utc.with_ymd_and_hms(2024, 1, 2, 22, 0, 0).unwrap()));
        assert_eq!(regular.session_secs(), 6.5 * 3600.0);

        let overnight = TradingHours::hm((23, 0), (22, 0));
        assert!(overnight.is_open(Utc.with_ymd_and_hms(2024, 1, 2, 23, 30, 0).unwrap()));
        assert!(!overnight.is_open(Utc.with_ymd_and_hms(2024, 1, 2, 22, 30, 0).unwrap()));

        assert!(TradingHours::always().is_open(Utc::now()));
    }

    #[test]
    fn test_json_round_trip_and_validation() {
        let json = serde_json::to_string(&Catalog::builtin()).unwrap();
        let parsed = Catalog::from_json(&json).unwrap();
        assert_eq!(parsed, Catalog::builtin());

        let mut dup = Catalog::builtin();
        dup.brokers.push(dup.brokers[0].clone());
        let json = serde_json::to_string(&dup).unwrap();
        assert!(matches!(Catalog::from_json(&json), Err(ExecutionError::Catalog { .. })));
    }

    #[test]
    fn test_store_toggles() {
        let store = CatalogStore::default();
        let before = store.snapshot();
        store.set_broker_active("alpaca", false).unwrap();
        assert!(before.broker("alpaca").unwrap().active);
        assert!(!store.snapshot().broker("alpaca").unwrap().active);
        assert!(store.set_venue_active("NOPE", false).is_err());
    }
}
