//! Smart order routing logic
//!
//! Ranks every eligible (broker, venue) pair for a request. The ranking is a
//! pure function of the catalog snapshot, the request and the quote source.

use common::constants::{BASIS_POINTS, LARGE_ORDER_QTY, VERY_LARGE_ORDER_QTY};
use common::{InstrumentClass, Px, Side, Symbol};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::algorithms::{
    AlgorithmKind, ScheduleContext, ScheduleSlice, build_schedule, select_algorithm,
};
use crate::catalog::{Broker, Catalog, Venue};
use crate::error::{ExecutionError, ExecutionResult};
use crate::market::{Quote, QuoteSource};
use crate::order::{OrderRequest, OrderType};

const WEIGHT_FILL: f64 = 0.3;
const WEIGHT_LATENCY: f64 = 0.2;
const WEIGHT_COST: f64 = 0.3;
const WEIGHT_PRICE: f64 = 0.2;
/// Price component until venues quote differentiated prices
const NEUTRAL_PRICE_SCORE: f64 = 1.0;

/// One ranked (broker, venue) option
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRoute {
    /// Broker
    pub broker_id: String,
    /// Venue
    pub venue_id: String,
    /// Quantity routed
    pub quantity: f64,
    /// Expected execution price
    pub expected_price: Px,
    /// Expected commission
    pub expected_commission: f64,
    /// Expected latency (milliseconds)
    pub expected_latency_ms: u64,
    /// Estimated probability of a fill
    pub fill_probability: f64,
    /// Composite score, higher is better
    pub score: f64,
    /// Human-readable summary
    pub reasoning: String,
}

/// Routing decision for one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteProposal {
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: f64,
    pub instrument_class: InstrumentClass,
    /// Best first
    pub routes: Vec<CandidateRoute>,
    /// Execution algorithm, if any
    pub algorithm: Option<String>,
    /// Child slices for algorithmic orders
    pub schedule: Vec<ScheduleSlice>,
    pub estimated_slippage_bps: f64,
    pub estimated_commission: f64,
    pub estimated_latency_ms: u64,
    /// Fill probability of the top route
    pub confidence: f64,
}

impl RouteProposal {
    /// Top-ranked route
    #[must_use]
    pub fn best(&self) -> Option<&CandidateRoute> {
        self.routes.first()
    }
}

/// Smart order router
#[derive(Debug, Clone)]
pub struct SmartRouter {
    venue_overhead_ms: u64,
}

impl SmartRouter {
    /// Create new router
    #[must_use]
    pub const fn new(venue_overhead_ms: u64) -> Self {
        Self { venue_overhead_ms }
    }

    /// Rank routes for a request
    pub fn route(
        &self,
        request: &OrderRequest,
        catalog: &Catalog,
        quotes: &dyn QuoteSource,
    ) -> ExecutionResult<RouteProposal> {
        let symbol = &request.symbol;
        let no_route = |reason: String| ExecutionError::NoRouteAvailable {
            symbol: symbol.to_string(),
            reason,
        };

        let class = symbol
            .instrument_class()
            .ok_or_else(|| no_route("unrecognised instrument class".to_string()))?;

        let brokers: Vec<&Broker> = catalog
            .brokers
            .iter()
            .filter(|b| {
                b.active
                    && b.supports_class(class)
                    && b.supports_order_type(request.order_type)
                    && b.supports_time_in_force(request.time_in_force)
            })
            .collect();
        if brokers.is_empty() {
            return Err(no_route(format!(
                "no active broker supports {class} {} {}",
                request.order_type,
                request.time_in_force.as_str()
            )));
        }

        let venues: Vec<&Venue> = catalog
            .venues
            .iter()
            .filter(|v| v.active && v.lists_class(class))
            .collect();
        if venues.is_empty() {
            return Err(no_route(format!("no active venue lists {class}")));
        }

        let algorithm = select_algorithm(request, catalog)?;
        let reference = quotes.reference_price(symbol);
        let quantity = request.quantity.as_f64();

        let mut routes = Vec::with_capacity(brokers.len() * venues.len());
        for broker in &brokers {
            for venue in &venues {
                routes.push(self.evaluate(request, class, broker, venue, reference));
            }
        }
        // stable: ties keep broker-then-venue catalog order
        routes.sort_by(|a, b| b.score.total_cmp(&a.score));

        let Some(top) = routes.first() else {
            return Err(no_route("no candidate routes".to_string()));
        };
        let top_venue = catalog.venue(&top.venue_id);
        let schedule = match algorithm.as_deref().and_then(AlgorithmKind::from_name) {
            Some(kind) => build_schedule(
                kind,
                &ScheduleContext {
                    quantity,
                    params: &request.algorithm_params,
                    defaults: algorithm
                        .as_deref()
                        .and_then(|name| catalog.algorithm(name))
                        .map(|a| &a.parameters),
                    daily_volume: top_venue.map_or(0.0, |v| v.avg_daily_volume),
                },
            ),
            None => Vec::new(),
        };

        let proposal = RouteProposal {
            symbol: symbol.clone(),
            side: request.side,
            quantity,
            instrument_class: class,
            algorithm,
            schedule,
            estimated_slippage_bps: top_venue.map_or(0.0, |v| v.avg_spread_bps / 2.0),
            estimated_commission: top.expected_commission,
            estimated_latency_ms: top.expected_latency_ms,
            confidence: top.fill_probability,
            routes,
        };

        debug!(
            "Routed {} {} {}: {} candidates, best {:?}",
            proposal.side,
            proposal.quantity,
            proposal.symbol,
            proposal.routes.len(),
            proposal.best().map(|r| (&r.broker_id, &r.venue_id))
        );
        Ok(proposal)
    }

    fn evaluate(
        &self,
        request: &OrderRequest,
        class: InstrumentClass,
        broker: &Broker,
        venue: &Venue,
        reference: Px,
    ) -> CandidateRoute {
        let quantity = request.quantity.as_f64();
        let expected_price = Quote::at_venue(reference, Some(venue)).for_side(request.side);
        let expected_commission = broker.commission(class, quantity, expected_price.as_f64());
        let expected_latency_ms = broker.latency_ms + self.venue_overhead_ms;
        let fill_probability = fill_probability(broker, venue, request.order_type, quantity);

        let notional = quantity * expected_price.as_f64();
        let commission_bps = if notional > 0.0 {
            expected_commission / notional * BASIS_POINTS
        } else {
            0.0
        };
        #[allow(clippy::cast_precision_loss)]
        let latency_score = 1.0 / (1.0 + expected_latency_ms as f64 / 100.0);
        let cost_score = 1.0 / (1.0 + commission_bps / 10.0);
        let score = WEIGHT_FILL * fill_probability
            + WEIGHT_LATENCY * latency_score
            + WEIGHT_COST * cost_score
            + WEIGHT_PRICE * NEUTRAL_PRICE_SCORE;

        CandidateRoute {
            broker_id: broker.id.clone(),
            venue_id: venue.id.clone(),
            quantity,
            expected_price,
            expected_commission,
            expected_latency_ms,
            fill_probability,
            score,
            reasoning: format!(
                "{} via {}: fill {:.0}%, latency {}ms, commission {:.2} ({:.2} bps)",
                broker.name,
                venue.name,
                fill_probability * 100.0,
                expected_latency_ms,
                expected_commission,
                commission_bps
            ),
        }
    }
}

/// Estimated chance a route fills the order
#[must_use]
pub fn fill_probability(
    broker: &Broker,
    venue: &Venue,
    order_type: OrderType,
    quantity: f64,
) -> f64 {
    let base = 0.7 * broker.reliability + 0.3 * venue.market_share;
    let type_factor = match order_type {
        OrderType::Market => 1.0,
        OrderType::Limit => 0.85,
        OrderType::Iceberg | OrderType::Twap | OrderType::Vwap | OrderType::Pov => 0.9,
        OrderType::Stop | OrderType::StopLimit | OrderType::TrailingStop => 0.75,
    };
    let mut probability = base * type_factor;
    if quantity > LARGE_ORDER_QTY {
        probability *= 0.9;
    }
    if quantity > VERY_LARGE_ORDER_QTY {
        probability *= 0.8;
    }
    probability.clamp(0.0, 1.0)
}
