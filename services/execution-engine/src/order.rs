//! Order definitions and structures

use chrono::{DateTime, Utc};
use common::{InstrumentClass, Px, Qty, Side, Symbol};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Engine-assigned order identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderId(pub u64);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Accepted by the engine, not yet acknowledged by a broker
    Pending,
    /// Acknowledged by the broker
    Submitted,
    /// Some quantity filled
    Partial,
    /// Fully filled
    Filled,
    /// Cancelled
    Cancelled,
    /// Rejected by the broker or gateway
    Rejected,
    /// Time in force elapsed
    Expired,
}

impl OrderStatus {
    /// No further transitions possible
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Cancelled | Self::Rejected | Self::Expired
        )
    }

    /// Member of the active set
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Stable lowercase name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Submitted => "submitted",
            Self::Partial => "partial",
            Self::Filled => "filled",
            Self::Cancelled => "cancelled",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    /// Market order
    Market,
    /// Limit order
    Limit,
    /// Stop order
    Stop,
    /// Stop limit order
    StopLimit,
    /// Trailing stop order
    TrailingStop,
    /// Iceberg order
    Iceberg,
    /// TWAP algorithm
    Twap,
    /// VWAP algorithm
    Vwap,
    /// POV algorithm
    Pov,
}

impl OrderType {
    /// Worked over time by an execution algorithm
    #[must_use]
    pub const fn is_algorithmic(&self) -> bool {
        matches!(self, Self::Iceberg | Self::Twap | Self::Vwap | Self::Pov)
    }

    /// Needs a limit price
    #[must_use]
    pub const fn requires_limit_price(&self) -> bool {
        matches!(self, Self::Limit | Self::StopLimit)
    }

    /// Needs a stop price
    #[must_use]
    pub const fn requires_stop_price(&self) -> bool {
        matches!(self, Self::Stop | Self::StopLimit)
    }

    /// Stable lowercase name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Market => "market",
            Self::Limit => "limit",
            Self::Stop => "stop",
            Self::StopLimit => "stop_limit",
            Self::TrailingStop => "trailing_stop",
            Self::Iceberg => "iceberg",
            Self::Twap => "twap",
            Self::Vwap => "vwap",
            Self::Pov => "pov",
        }
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Time in force
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeInForce {
    /// Good till cancelled
    Gtc,
    /// Immediate or cancel
    Ioc,
    /// Fill or kill
    Fok,
    /// Good for day
    Day,
    /// Good till date
    Gtd,
}

impl TimeInForce {
    /// Stable lowercase name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Gtc => "gtc",
            Self::Ioc => "ioc",
            Self::Fok => "fok",
            Self::Day => "day",
            Self::Gtd => "gtd",
        }
    }
}

/// Liquidity role of a fill
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiquidityFlag {
    /// Added liquidity
    Maker,
    /// Removed liquidity
    Taker,
    /// Not reported
    Unknown,
}

/// Protective exit levels attached to an order
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ProtectiveLevels {
    /// Stop-loss price
    pub stop_loss: Option<Px>,
    /// Take-profit price
    pub take_profit: Option<Px>,
    /// Trailing distance for trailing stops
    pub trailing_offset: Option<Px>,
}

/// Order structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Engine order ID
    pub id: OrderId,
    /// Client order ID
    pub client_order_id: String,
    /// Broker-assigned ID once acknowledged
    pub broker_order_id: Option<String>,
    /// Account
    pub account_id: String,
    /// Strategy ID
    pub strategy_id: Option<String>,
    /// Symbol
    pub symbol: Symbol,
    /// Derived instrument class
    pub instrument_class: InstrumentClass,
    /// Order side
    pub side: Side,
    /// Order type
    pub order_type: OrderType,
    /// Original quantity
    pub quantity: Qty,
    /// Limit price
    pub limit_price: Option<Px>,
    /// Stop price
    pub stop_price: Option<Px>,
    /// Time in force
    pub time_in_force: TimeInForce,
    /// Computed expiry
    pub expires_at: Option<DateTime<Utc>>,
    /// Routed broker
    pub broker_id: String,
    /// Routed venue
    pub venue_id: String,
    /// Parent order for child orders
    pub parent_order_id: Option<OrderId>,
    /// Protective levels
    pub protective: ProtectiveLevels,
    /// Execution algorithm
    pub algorithm: Option<String>,
    /// Algorithm parameters
    pub algorithm_params: BTreeMap<String, f64>,
    /// Tags for categorization
    pub tags: Vec<String>,
    /// Free-form notes
    pub notes: Option<String>,
    /// Reference price at creation
    pub arrival_price: Px,
    /// Why the order was rejected
    pub reject_reason: Option<String>,
    /// Order status
    pub status: OrderStatus,
    /// Executed quantity
    pub filled_quantity: Qty,
    /// Quantity-weighted average fill price
    pub average_price: Px,
    /// Accumulated commission
    pub commission: f64,
    /// Absolute distance of average price from the reference price
    pub slippage: f64,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Broker acknowledgement timestamp
    pub submitted_at: Option<DateTime<Utc>>,
    /// Final fill timestamp
    pub filled_at: Option<DateTime<Utc>>,
    /// Cancellation timestamp
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

/// Routing outcome stamped onto a new order
#[derive(Debug, Clone)]
pub struct Placement {
    /// Chosen broker
    pub broker_id: String,
    /// Chosen venue
    pub venue_id: String,
    /// Reference price at creation
    pub arrival_price: Px,
    /// Computed expiry
    pub expires_at: Option<DateTime<Utc>>,
    /// Execution algorithm
    pub algorithm: Option<String>,
}

impl Order {
    /// Build a pending order from a validated request
    #[must_use]
    pub fn from_request(
        id: OrderId,
        request: OrderRequest,
        instrument_class: InstrumentClass,
        placement: Placement,
        now: DateTime<Utc>,
    ) -> Self {
        let client_order_id = request
            .client_order_id
            .unwrap_or_else(|| format!("CL-{}", Uuid::new_v4()));

        Self {
            id,
            client_order_id,
            broker_order_id: None,
            account_id: request.account_id,
            strategy_id: request.strategy_id,
            symbol: request.symbol,
            instrument_class,
            side: request.side,
            order_type: request.order_type,
            quantity: request.quantity,
            limit_price: request.limit_price,
            stop_price: request.stop_price,
            time_in_force: request.time_in_force,
            expires_at: placement.expires_at,
            broker_id: placement.broker_id,
            venue_id: placement.venue_id,
            parent_order_id: request.parent_order_id,
            protective: request.protective,
            algorithm: placement.algorithm,
            algorithm_params: request.algorithm_params,
            tags: request.tags,
            notes: request.notes,
            arrival_price: placement.arrival_price,
            reject_reason: None,
            status: OrderStatus::Pending,
            filled_quantity: Qty::ZERO,
            average_price: Px::ZERO,
            commission: 0.0,
            slippage: 0.0,
            created_at: now,
            submitted_at: None,
            filled_at: None,
            cancelled_at: None,
            updated_at: now,
        }
    }

    /// Quantity still open
    #[must_use]
    pub fn remaining(&self) -> Qty {
        Qty::new((self.quantity.as_f64() - self.filled_quantity.as_f64()).max(0.0))
    }

    /// No further transitions possible
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Filled notional at the average price
    #[must_use]
    pub fn filled_notional(&self) -> f64 {
        self.filled_quantity.as_f64() * self.average_price.as_f64()
    }

    /// Price slippage is measured against
    #[must_use]
    pub fn reference_price(&self) -> Px {
        self.limit_price.unwrap_or(self.arrival_price)
    }
}

/// Fill information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderFill {
    /// Order ID
    pub order_id: OrderId,
    /// Fill quantity
    pub quantity: Qty,
    /// Fill price
    pub price: Px,
    /// Commission charged on this fill
    pub commission: f64,
    /// Executing venue
    pub venue_id: String,
    /// Trade ID
    pub trade_id: String,
    /// Fill timestamp
    pub timestamp: DateTime<Utc>,
    /// Liquidity role
    pub liquidity: LiquidityFlag,
}

/// Fill as produced by a fill model or an external execution report
#[derive(Debug, Clone, PartialEq)]
pub struct FillDraft {
    /// Fill quantity
    pub quantity: Qty,
    /// Fill price
    pub price: Px,
    /// Executing venue, the order's venue when absent
    pub venue_id: Option<String>,
    /// Liquidity role
    pub liquidity: LiquidityFlag,
    /// Trade ID, generated when absent
    pub trade_id: Option<String>,
    /// Execution time, now when absent
    pub timestamp: Option<DateTime<Utc>>,
}

impl FillDraft {
    /// Fill at the order's own venue
    #[must_use]
    pub const fn new(quantity: Qty, price: Px) -> Self {
        Self {
            quantity,
            price,
            venue_id: None,
            liquidity: LiquidityFlag::Unknown,
            trade_id: None,
            timestamp: None,
        }
    }

    /// Attribute to a venue
    #[must_use]
    pub fn at_venue(mut self, venue: impl Into<String>) -> Self {
        self.venue_id = Some(venue.into());
        self
    }

    /// Set the liquidity role
    #[must_use]
    pub const fn with_liquidity(mut self, liquidity: LiquidityFlag) -> Self {
        self.liquidity = liquidity;
        self
    }

    /// Set the execution time
    #[must_use]
    pub const fn at_time(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Order request for creating new orders
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Client order ID
    pub client_order_id: Option<String>,
    /// Account
    pub account_id: String,
    /// Strategy ID
    pub strategy_id: Option<String>,
    /// Symbol
    pub symbol: Symbol,
    /// Side
    pub side: Side,
    /// Order type
    pub order_type: OrderType,
    /// Quantity
    pub quantity: Qty,
    /// Limit price
    pub limit_price: Option<Px>,
    /// Stop price
    pub stop_price: Option<Px>,
    /// Time in force
    pub time_in_force: TimeInForce,
    /// Expiry for GTD orders
    pub expire_at: Option<DateTime<Utc>>,
    /// Parent order ID
    pub parent_order_id: Option<OrderId>,
    /// Protective levels
    pub protective: ProtectiveLevels,
    /// Algorithm hint
    pub algorithm: Option<String>,
    /// Algorithm parameters
    pub algorithm_params: BTreeMap<String, f64>,
    /// Tags
    pub tags: Vec<String>,
    /// Notes
    pub notes: Option<String>,
}

impl OrderRequest {
    /// Bare request with GTC time in force
    pub fn new(
        account_id: impl Into<String>,
        symbol: impl Into<String>,
        side: Side,
        order_type: OrderType,
        quantity: f64,
    ) -> Self {
        Self {
            client_order_id: None,
            account_id: account_id.into(),
            strategy_id: None,
            symbol: Symbol::new(symbol),
            side,
            order_type,
            quantity: Qty::new(quantity),
            limit_price: None,
            stop_price: None,
            time_in_force: TimeInForce::Gtc,
            expire_at: None,
            parent_order_id: None,
            protective: ProtectiveLevels::default(),
            algorithm: None,
            algorithm_params: BTreeMap::new(),
            tags: Vec::new(),
            notes: None,
        }
    }

    /// Market order
    pub fn market(
        account_id: impl Into<String>,
        symbol: impl Into<String>,
        side: Side,
        quantity: f64,
    ) -> Self {
        Self::new(account_id, symbol, side, OrderType::Market, quantity)
    }

    /// Limit order
    pub fn limit(
        account_id: impl Into<String>,
        symbol: impl Into<String>,
        side: Side,
        quantity: f64,
        price: f64,
    ) -> Self {
        Self::new(account_id, symbol, side, OrderType::Limit, quantity).with_limit_price(price)
    }

    /// Set the limit price
    #[must_use]
    pub fn with_limit_price(mut self, price: f64) -> Self {
        self.limit_price = Some(Px::new(price));
        self
    }

    /// Set the stop price
    #[must_use]
    pub fn with_stop_price(mut self, price: f64) -> Self {
        self.stop_price = Some(Px::new(price));
        self
    }

    /// Set time in force
    #[must_use]
    pub fn with_time_in_force(mut self, tif: TimeInForce) -> Self {
        self.time_in_force = tif;
        self
    }

    /// Good till date
    #[must_use]
    pub fn good_till(mut self, expire_at: DateTime<Utc>) -> Self {
        self.time_in_force = TimeInForce::Gtd;
        self.expire_at = Some(expire_at);
        self
    }

    /// Set the client order ID
    #[must_use]
    pub fn with_client_order_id(mut self, id: impl Into<String>) -> Self {
        self.client_order_id = Some(id.into());
        self
    }

    /// Set the strategy ID
    #[must_use]
    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy_id = Some(strategy.into());
        self
    }

    /// Attach to a parent order
    #[must_use]
    pub const fn with_parent(mut self, parent: OrderId) -> Self {
        self.parent_order_id = Some(parent);
        self
    }

    /// Set protective levels
    #[must_use]
    pub const fn with_protective(mut self, protective: ProtectiveLevels) -> Self {
        self.protective = protective;
        self
    }

    /// Request a named algorithm
    #[must_use]
    pub fn with_algorithm(mut self, name: impl Into<String>) -> Self {
        self.algorithm = Some(name.into());
        self
    }

    /// Add an algorithm parameter
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: f64) -> Self {
        self.algorithm_params.insert(key.into(), value);
        self
    }

    /// Add a tag
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// Requested changes to a live order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderModification {
    /// New total quantity
    pub quantity: Option<Qty>,
    /// New limit price
    pub limit_price: Option<Px>,
    /// New stop price
    pub stop_price: Option<Px>,
    /// Replacement protective levels
    pub protective: Option<ProtectiveLevels>,
    /// Replacement notes
    pub notes: Option<String>,
}

impl OrderModification {
    /// Nothing requested
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.quantity.is_none()
            && self.limit_price.is_none()
            && self.stop_price.is_none()
            && self.protective.is_none()
            && self.notes.is_none()
    }
}

/// Order query filter; absent fields match everything
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderFilter {
    pub account_id: Option<String>,
    pub strategy_id: Option<String>,
    pub symbol: Option<Symbol>,
    pub status: Option<OrderStatus>,
    pub side: Option<Side>,
    pub broker_id: Option<String>,
    pub parent_order_id: Option<OrderId>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    /// Maximum number of results
    pub limit: Option<usize>,
}

impl OrderFilter {
    /// Everything
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Orders of one account
    pub fn for_account(account_id: impl Into<String>) -> Self {
        Self {
            account_id: Some(account_id.into()),
            ..Self::default()
        }
    }

    /// True when `order` satisfies every populated field
    #[must_use]
    pub fn matches(&self, order: &Order) -> bool {
        self.account_id.as_ref().is_none_or(|a| *a == order.account_id)
            && self
                .strategy_id
                .as_ref()
                .is_none_or(|s| order.strategy_id.as_ref() == Some(s))
            && self.symbol.as_ref().is_none_or(|s| *s == order.symbol)
            && self.status.is_none_or(|s| s == order.status)
            && self.side.is_none_or(|s| s == order.side)
            && self.broker_id.as_ref().is_none_or(|b| *b == order.broker_id)
            && self
                .parent_order_id
                .is_none_or(|p| order.parent_order_id == Some(p))
            && self.created_from.is_none_or(|t| order.created_at >= t)
            && self.created_to.is_none_or(|t| order.created_at <= t)
    }
}
