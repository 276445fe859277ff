//! Execution quality analytics

use chrono::{DateTime, Utc};
use common::constants::{BASIS_POINTS, PERCENT_SCALE};
use common::{Px, Side, Symbol};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::order::{Order, OrderFill, OrderId, OrderStatus};

/// Square-root impact coefficient
const IMPACT_COEFFICIENT: f64 = 0.1;

/// Per-venue slice of an execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueBreakdown {
    pub venue_id: String,
    pub quantity: f64,
    pub vwap: Px,
    pub commission: f64,
    pub fill_count: usize,
    pub first_fill_at: DateTime<Utc>,
}

/// Reference prices the execution is judged against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Benchmarks {
    pub arrival_price: Px,
    /// Current reference price
    pub close_price: Px,
    pub vwap: Px,
    pub twap: Px,
    /// Cost versus arrival, positive when the execution was worse
    pub implementation_shortfall_bps: f64,
}

/// Scores on a 0-100 scale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceScores {
    pub price_improvement: f64,
    pub fill_rate: f64,
    pub speed: f64,
    pub cost: f64,
    pub overall: f64,
}

/// Post-trade report for a filled order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub order_id: OrderId,
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: f64,
    pub filled_quantity: f64,
    pub average_price: Px,
    pub vwap: Px,
    pub twap: Px,
    pub commission: f64,
    pub slippage: f64,
    pub slippage_bps: f64,
    pub commission_bps: f64,
    pub execution_duration_ms: i64,
    /// Share of estimated venue volume over the execution window
    pub participation_rate: f64,
    pub market_impact_bps: f64,
    pub fill_count: usize,
    /// Venues in order of first fill
    pub venues: Vec<VenueBreakdown>,
    pub benchmarks: Benchmarks,
    pub scores: PerformanceScores,
    pub generated_at: DateTime<Utc>,
}

/// Market context a report is computed against
#[derive(Debug, Clone, Copy)]
pub struct MarketContext {
    /// Current reference price
    pub close_price: Px,
    /// Typical daily volume at the order's venue
    pub daily_volume: f64,
    /// Length of the venue session (seconds)
    pub session_secs: f64,
}

impl ExecutionReport {
    /// Build the report; `None` unless the order is filled and has fills
    #[must_use]
    pub fn build(
        order: &Order,
        fills: &[OrderFill],
        market: MarketContext,
        now: DateTime<Utc>,
    ) -> Option<Self> {
        if order.status != OrderStatus::Filled || fills.is_empty() {
            return None;
        }

        let filled: f64 = fills.iter().map(|f| f.quantity.as_f64()).sum();
        if filled <= 0.0 {
            return None;
        }
        let vwap = fills
            .iter()
            .map(|f| f.price.as_f64() * f.quantity.as_f64())
            .sum::<f64>()
            / filled;
        #[allow(clippy::cast_precision_loss)]
        let twap = fills.iter().map(|f| f.price.as_f64()).sum::<f64>() / fills.len() as f64;

        let average = order.average_price.as_f64();
        let notional = order.filled_quantity.as_f64() * average;
        let slippage_bps = ratio_bps(order.slippage, average);
        let commission_bps = ratio_bps(order.commission, notional);

        let started = order.submitted_at.unwrap_or(order.created_at);
        let finished = order
            .filled_at
            .or_else(|| fills.last().map(|f| f.timestamp))
            .unwrap_or(now);
        let execution_duration_ms = (finished - started).num_milliseconds().max(0);
        #[allow(clippy::cast_precision_loss)]
        let duration_secs = (execution_duration_ms as f64 / 1000.0).max(1.0);

        let participation_rate = if market.daily_volume > 0.0 && market.session_secs > 0.0 {
            let window_volume = market.daily_volume * duration_secs / market.session_secs;
            (filled / window_volume).min(1.0)
        } else {
            0.0
        };
        let market_impact_bps = if market.daily_volume > 0.0 {
            IMPACT_COEFFICIENT * (filled / market.daily_volume).sqrt() * BASIS_POINTS
        } else {
            0.0
        };

        let arrival = order.arrival_price.as_f64();
        let implementation_shortfall_bps = if arrival > 0.0 {
            order.side.sign() * (average - arrival) / arrival * BASIS_POINTS
        } else {
            0.0
        };

        let fill_rate = order.filled_quantity.as_f64() / order.quantity.as_f64() * PERCENT_SCALE;
        let scores = PerformanceScores::compute(
            implementation_shortfall_bps,
            fill_rate,
            duration_secs,
            commission_bps,
        );

        Some(Self {
            order_id: order.id,
            symbol: order.symbol.clone(),
            side: order.side,
            quantity: order.quantity.as_f64(),
            filled_quantity: order.filled_quantity.as_f64(),
            average_price: order.average_price,
            vwap: Px::new(vwap),
            twap: Px::new(twap),
            commission: order.commission,
            slippage: order.slippage,
            slippage_bps,
            commission_bps,
            execution_duration_ms,
            participation_rate,
            market_impact_bps,
            fill_count: fills.len(),
            venues: venue_breakdown(fills),
            benchmarks: Benchmarks {
                arrival_price: order.arrival_price,
                close_price: market.close_price,
                vwap: Px::new(vwap),
                twap: Px::new(twap),
                implementation_shortfall_bps,
            },
            scores,
            generated_at: now,
        })
    }
}

impl PerformanceScores {
    fn compute(
        shortfall_bps: f64,
        fill_rate: f64,
        duration_secs: f64,
        commission_bps: f64,
    ) -> Self {
        let clamp = |v: f64| v.clamp(0.0, PERCENT_SCALE);
        let price_improvement = clamp(50.0 - shortfall_bps.clamp(-50.0, 50.0));
        let fill_rate = clamp(fill_rate);
        let speed = clamp(PERCENT_SCALE / (1.0 + duration_secs / 60.0));
        let cost = clamp(PERCENT_SCALE / (1.0 + commission_bps / 10.0));
        let overall = (price_improvement + fill_rate + speed + cost) / 4.0;
        Self {
            price_improvement,
            fill_rate,
            speed,
            cost,
            overall,
        }
    }
}

fn ratio_bps(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        part / whole * BASIS_POINTS
    } else {
        0.0
    }
}

fn venue_breakdown(fills: &[OrderFill]) -> Vec<VenueBreakdown> {
    let mut index: FxHashMap<&str, usize> = FxHashMap::default();
    let mut venues: Vec<(VenueBreakdown, f64)> = Vec::new();
    for fill in fills {
        let slot = *index.entry(fill.venue_id.as_str()).or_insert_with(|| {
            venues.push((
                VenueBreakdown {
                    venue_id: fill.venue_id.clone(),
                    quantity: 0.0,
                    vwap: Px::ZERO,
                    commission: 0.0,
                    fill_count: 0,
                    first_fill_at: fill.timestamp,
                },
                0.0,
            ));
            venues.len() - 1
        });
        let (entry, notional) = &mut venues[slot];
        entry.quantity += fill.quantity.as_f64();
        entry.commission += fill.commission;
        entry.fill_count += 1;
        entry.first_fill_at = entry.first_fill_at.min(fill.timestamp);
        *notional += fill.price.as_f64() * fill.quantity.as_f64();
    }
    venues
        .into_iter()
        .map(|(mut entry, notional)| {
            if entry.quantity > 0.0 {
                entry.vwap = Px::new(notional / entry.quantity);
            }
            entry
        })
        .collect()
}

/// Order counts per status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub submitted: usize,
    pub partial: usize,
    pub filled: usize,
    pub cancelled: usize,
    pub rejected: usize,
    pub expired: usize,
}

impl StatusCounts {
    fn record(&mut self, status: OrderStatus) {
        let slot = match status {
            OrderStatus::Pending => &mut self.pending,
            OrderStatus::Submitted => &mut self.submitted,
            OrderStatus::Partial => &mut self.partial,
            OrderStatus::Filled => &mut self.filled,
            OrderStatus::Cancelled => &mut self.cancelled,
            OrderStatus::Rejected => &mut self.rejected,
            OrderStatus::Expired => &mut self.expired,
        };
        *slot += 1;
    }
}

/// Aggregate execution figures over a set of orders
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStatistics {
    pub total_orders: usize,
    pub by_status: StatusCounts,
    /// Filled orders as a share of all orders (0-1)
    pub fill_rate: f64,
    pub total_filled_quantity: f64,
    pub total_notional: f64,
    pub total_commission: f64,
    /// Mean slippage over orders with fills
    pub average_slippage_bps: f64,
    pub orders_by_broker: BTreeMap<String, usize>,
}

impl ExecutionStatistics {
    /// Aggregate a set of orders
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_orders<'a>(orders: impl IntoIterator<Item = &'a Order>) -> Self {
        let mut stats = Self::default();
        let mut slippage_sum = 0.0;
        let mut with_fills = 0usize;

        for order in orders {
            stats.total_orders += 1;
            stats.by_status.record(order.status);
            *stats
                .orders_by_broker
                .entry(order.broker_id.clone())
                .or_insert(0) += 1;
            stats.total_commission += order.commission;

            if order.filled_quantity.is_positive() {
                stats.total_filled_quantity += order.filled_quantity.as_f64();
                stats.total_notional += order.filled_notional();
                slippage_sum += ratio_bps(order.slippage, order.average_price.as_f64());
                with_fills += 1;
            }
        }

        if stats.total_orders > 0 {
            stats.fill_rate = stats.by_status.filled as f64 / stats.total_orders as f64;
        }
        if with_fills > 0 {
            stats.average_slippage_bps = slippage_sum / with_fills as f64;
        }
        stats
    }
}
