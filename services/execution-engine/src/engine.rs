//! Execution engine facade
//!
//! Ties the registry, catalog, router, gateway and fill model together and
//! exposes the external order interface. Every state change publishes an
//! [`OrderEvent`].

use chrono::{DateTime, Utc};
use common::constants::SESSION_SECS;
use common::Symbol;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use crate::analytics::{ExecutionReport, ExecutionStatistics, MarketContext};
use crate::catalog::{Broker, Catalog, CatalogStore, ExecutionAlgorithm, Venue};
use crate::config::EngineConfig;
use crate::error::{ExecutionError, ExecutionResult};
use crate::events::OrderEvent;
use crate::gateway::{BrokerGateway, ExecutionGateway};
use crate::lifecycle::{OrderLifecycle, compute_expiry, validate_request};
use crate::market::{OrderBookSnapshot, QuoteSource, SyntheticQuotes};
use crate::order::{
    FillDraft, Order, OrderFill, OrderFilter, OrderId, OrderModification, OrderRequest,
    OrderStatus, Placement,
};
use crate::registry::OrderRegistry;
use crate::router::{RouteProposal, SmartRouter};
use crate::simulator::{FillModel, RandomFillModel};

/// Engine counters
#[derive(Debug, Default)]
pub struct EngineMetrics {
    pub orders_created: AtomicU64,
    pub orders_submitted: AtomicU64,
    pub orders_rejected: AtomicU64,
    pub fills_applied: AtomicU64,
    pub fill_failures: AtomicU64,
    pub orders_cancelled: AtomicU64,
    pub orders_modified: AtomicU64,
    pub orders_expired: AtomicU64,
    pub orders_evicted: AtomicU64,
}

/// Point-in-time copy of [`EngineMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub orders_created: u64,
    pub orders_submitted: u64,
    pub orders_rejected: u64,
    pub fills_applied: u64,
    pub fill_failures: u64,
    pub orders_cancelled: u64,
    pub orders_modified: u64,
    pub orders_expired: u64,
    pub orders_evicted: u64,
}

impl EngineMetrics {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Read every counter
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            orders_created: self.orders_created.load(Ordering::Relaxed),
            orders_submitted: self.orders_submitted.load(Ordering::Relaxed),
            orders_rejected: self.orders_rejected.load(Ordering::Relaxed),
            fills_applied: self.fills_applied.load(Ordering::Relaxed),
            fill_failures: self.fill_failures.load(Ordering::Relaxed),
            orders_cancelled: self.orders_cancelled.load(Ordering::Relaxed),
            orders_modified: self.orders_modified.load(Ordering::Relaxed),
            orders_expired: self.orders_expired.load(Ordering::Relaxed),
            orders_evicted: self.orders_evicted.load(Ordering::Relaxed),
        }
    }
}

/// Overall engine condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Able to route
    Healthy,
    /// No active broker or venue
    Degraded,
}

/// Health report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineHealth {
    pub status: HealthStatus,
    pub active_orders: usize,
    pub total_orders: usize,
    pub brokers: usize,
    pub active_brokers: usize,
    pub venues: usize,
    pub active_venues: usize,
    /// Active venues whose session is open right now
    pub open_venues: usize,
    pub algorithms: usize,
    pub uptime_secs: u64,
    pub metrics: MetricsSnapshot,
}

/// Outcome of one background pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    /// Orders looked at
    pub examined: usize,
    /// Orders changed
    pub applied: usize,
    /// Orders that failed and were skipped
    pub failed: usize,
}

/// Order execution and smart routing engine
pub struct ExecutionEngine {
    config: EngineConfig,
    catalog: CatalogStore,
    registry: OrderRegistry,
    router: SmartRouter,
    gateway: ExecutionGateway,
    fill_model: Arc<dyn FillModel>,
    quotes: Arc<dyn QuoteSource>,
    events: broadcast::Sender<OrderEvent>,
    metrics: EngineMetrics,
    started: Instant,
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("orders", &self.registry.len())
            .field("active", &self.registry.active_len())
            .field("gateway", &self.gateway)
            .finish_non_exhaustive()
    }
}

impl ExecutionEngine {
    /// Create an engine with the random fill model and synthetic quotes.
    ///
    /// The configuration is validated first; a bad fill model range would
    /// otherwise only surface inside the background fill pass.
    pub fn new(
        config: EngineConfig,
        catalog: Catalog,
        gateway: Arc<dyn BrokerGateway>,
    ) -> ExecutionResult<Self> {
        config
            .validate()
            .map_err(|e| ExecutionError::InvalidConfig {
                reason: e.to_string(),
            })?;
        catalog.validate()?;

        let (events, _) = broadcast::channel(config.event_capacity);
        let fill_model = Arc::new(RandomFillModel::new(config.fill_model.clone(), config.seed));
        Ok(Self {
            router: SmartRouter::new(config.venue_latency_overhead_ms),
            gateway: ExecutionGateway::new(gateway, config.gateway_timeout()),
            catalog: CatalogStore::new(catalog),
            registry: OrderRegistry::new(),
            fill_model,
            quotes: Arc::new(SyntheticQuotes::new()),
            events,
            metrics: EngineMetrics::default(),
            started: Instant::now(),
            config,
        })
    }

    /// Replace the fill model
    #[must_use]
    pub fn with_fill_model(mut self, fill_model: Arc<dyn FillModel>) -> Self {
        self.fill_model = fill_model;
        self
    }

    /// Replace the quote source
    #[must_use]
    pub fn with_quote_source(mut self, quotes: Arc<dyn QuoteSource>) -> Self {
        self.quotes = quotes;
        self
    }

    /// Configuration in force
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Catalog store, for administrative toggles
    #[must_use]
    pub const fn catalog(&self) -> &CatalogStore {
        &self.catalog
    }

    /// Counter snapshot
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Receive lifecycle events from now on
    pub fn subscribe(&self) -> broadcast::Receiver<OrderEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: OrderEvent) {
        trace!("Publishing event for order {}", event.order_id());
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    /// Validate, route, register and submit an order.
    ///
    /// A broker refusal or timeout leaves the order queryable as `rejected`
    /// and returns the submission error.
    pub async fn create_order(&self, request: OrderRequest) -> ExecutionResult<Order> {
        let now = Utc::now();
        validate_request(&request, now)?;

        if let Some(parent) = request.parent_order_id {
            if !self.registry.contains(parent) {
                return Err(ExecutionError::validation(format!(
                    "parent order {parent} not found"
                )));
            }
        }
        if let Some(client_id) = &request.client_order_id {
            if self.registry.get_by_client_id(client_id).is_some() {
                return Err(ExecutionError::validation(format!(
                    "duplicate client order id {client_id}"
                )));
            }
        }

        let catalog = self.catalog.snapshot();
        let proposal = self.router.route(&request, &catalog, self.quotes.as_ref())?;
        let Some(best) = proposal.best() else {
            return Err(ExecutionError::NoRouteAvailable {
                symbol: request.symbol.to_string(),
                reason: "empty route list".to_string(),
            });
        };
        let broker = catalog
            .broker(&best.broker_id)
            .ok_or_else(|| ExecutionError::BrokerNotFound {
                broker: best.broker_id.clone(),
            })?;

        let placement = Placement {
            broker_id: best.broker_id.clone(),
            venue_id: best.venue_id.clone(),
            arrival_price: self.quotes.reference_price(&request.symbol),
            expires_at: compute_expiry(
                request.time_in_force,
                request.expire_at,
                now,
                self.config.ioc_window(),
            ),
            algorithm: proposal.algorithm.clone(),
        };
        let order_id = self.registry.next_id();
        let order = Order::from_request(
            order_id,
            request,
            proposal.instrument_class,
            placement,
            now,
        );
        self.registry.insert(order.clone())?;
        EngineMetrics::bump(&self.metrics.orders_created);
        info!(
            "Order {} created: {} {} {} via {}/{}",
            order_id, order.side, order.quantity, order.symbol, order.broker_id, order.venue_id
        );
        self.publish(OrderEvent::Created(order.clone()));

        match self.gateway.submit(&order, broker).await {
            Ok(broker_order_id) => {
                let submitted =
                    self.registry
                        .mark_submitted(order_id, broker_order_id.clone(), Utc::now())?;
                EngineMetrics::bump(&self.metrics.orders_submitted);
                self.publish(OrderEvent::Submitted {
                    order_id,
                    broker_id: submitted.broker_id.clone(),
                    broker_order_id,
                    timestamp: submitted.updated_at,
                });
                Ok(submitted)
            }
            Err(err) => {
                let rejected = self
                    .registry
                    .mark_rejected(order_id, err.to_string(), Utc::now())?;
                EngineMetrics::bump(&self.metrics.orders_rejected);
                warn!("Order {} rejected: {}", order_id, err);
                self.publish(OrderEvent::Rejected {
                    order_id,
                    reason: err.to_string(),
                    timestamp: rejected.updated_at,
                });
                Err(err)
            }
        }
    }

    fn broker_for(&self, order: &Order) -> ExecutionResult<Broker> {
        self.catalog
            .snapshot()
            .broker(&order.broker_id)
            .cloned()
            .ok_or_else(|| ExecutionError::BrokerNotFound {
                broker: order.broker_id.clone(),
            })
    }

    /// Cancel an order.
    ///
    /// `Ok(false)` when the broker declined or the order has not been
    /// acknowledged yet; terminal orders are refused without change.
    pub async fn cancel_order(&self, order_id: OrderId) -> ExecutionResult<bool> {
        let order = self
            .registry
            .get(order_id)
            .ok_or(ExecutionError::OrderNotFound { order_id })?;
        if order.is_terminal() {
            return Err(ExecutionError::NotCancellable {
                order_id,
                status: order.status,
            });
        }
        if !OrderLifecycle::can_cancel(order.status) {
            debug!(
                "Order {} is {}; nothing to cancel at the broker yet",
                order_id, order.status
            );
            return Ok(false);
        }

        let broker = self.broker_for(&order)?;
        if !self.gateway.cancel(&order, &broker).await {
            warn!("Broker {} declined cancel of order {}", broker.id, order_id);
            return Ok(false);
        }

        let cancelled = self.registry.cancel(order_id, Utc::now())?;
        EngineMetrics::bump(&self.metrics.orders_cancelled);
        self.publish(OrderEvent::Cancelled {
            order_id,
            timestamp: cancelled.updated_at,
        });
        Ok(true)
    }

    /// Amend a working order
    pub async fn modify_order(
        &self,
        order_id: OrderId,
        changes: OrderModification,
    ) -> ExecutionResult<Order> {
        let order = self
            .registry
            .get(order_id)
            .ok_or(ExecutionError::OrderNotFound { order_id })?;
        if !OrderLifecycle::can_modify(order.status) {
            return Err(ExecutionError::NotModifiable {
                order_id,
                status: order.status,
            });
        }
        validate_modification(&order, &changes)?;

        let broker = self.broker_for(&order)?;
        if !self.gateway.modify(&order, &changes, &broker).await {
            return Err(ExecutionError::BrokerModificationFailed {
                order_id,
                broker: broker.id,
            });
        }

        let modified = self.registry.modify(order_id, &changes, Utc::now())?;
        EngineMetrics::bump(&self.metrics.orders_modified);
        self.publish(OrderEvent::Modified {
            order_id,
            changes,
            timestamp: modified.updated_at,
        });
        Ok(modified)
    }

    /// Apply a fill from the fill model or an external execution report
    pub fn apply_fill(&self, order_id: OrderId, draft: FillDraft) -> ExecutionResult<OrderFill> {
        let catalog = self.catalog.snapshot();
        let result = self.registry.apply_fill(
            order_id,
            draft,
            |order, draft| {
                catalog.broker(&order.broker_id).map_or(0.0, |broker| {
                    broker.fill_commission(
                        order.instrument_class,
                        draft.quantity.as_f64(),
                        draft.price.as_f64(),
                        order.commission,
                    )
                })
            },
            Utc::now(),
        );

        match result {
            Ok((fill, order)) => {
                EngineMetrics::bump(&self.metrics.fills_applied);
                self.publish(OrderEvent::Filled {
                    order_id,
                    fill: fill.clone(),
                    status: order.status,
                });
                Ok(fill)
            }
            Err(err) => {
                EngineMetrics::bump(&self.metrics.fill_failures);
                Err(err)
            }
        }
    }

    /// Offer every working order to the fill model once
    pub fn run_fill_pass(&self) -> PassSummary {
        let mut summary = PassSummary::default();
        for order in self.registry.working_orders() {
            summary.examined += 1;
            let reference = self.quotes.reference_price(&order.symbol);
            let Some(draft) = self.fill_model.next_fill(&order, reference) else {
                continue;
            };
            match self.apply_fill(order.id, draft) {
                Ok(_) => summary.applied += 1,
                Err(err) => {
                    warn!("Fill pass skipped order {}: {}", order.id, err);
                    summary.failed += 1;
                }
            }
        }
        summary
    }

    /// Expire working orders whose time in force has elapsed at `now`
    pub fn run_expiry_pass(&self, now: DateTime<Utc>) -> PassSummary {
        let mut summary = PassSummary::default();
        for order_id in self.registry.active_ids() {
            summary.examined += 1;
            match self.registry.expire(order_id, now) {
                Ok(Some(order)) => {
                    summary.applied += 1;
                    EngineMetrics::bump(&self.metrics.orders_expired);
                    self.publish(OrderEvent::Expired {
                        order_id,
                        timestamp: order.updated_at,
                    });
                }
                Ok(None) => {}
                Err(err) => {
                    warn!("Status sweep skipped order {}: {}", order_id, err);
                    summary.failed += 1;
                }
            }
        }
        summary
    }

    /// Evict terminal orders older than the retention window; returns the count
    pub fn run_cleanup_pass(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.config.terminal_retention();
        let evicted = self.registry.evict_terminal(cutoff);
        for order_id in &evicted {
            self.publish(OrderEvent::Evicted {
                order_id: *order_id,
            });
        }
        self.metrics
            .orders_evicted
            .fetch_add(evicted.len() as u64, Ordering::Relaxed);
        evicted.len()
    }

    /// Order snapshot
    #[must_use]
    pub fn get_order(&self, order_id: OrderId) -> Option<Order> {
        self.registry.get(order_id)
    }

    /// Fills of an order
    #[must_use]
    pub fn get_fills(&self, order_id: OrderId) -> Option<Vec<OrderFill>> {
        self.registry.fills(order_id)
    }

    /// Orders matching a filter, newest first
    #[must_use]
    pub fn get_orders(&self, filter: &OrderFilter) -> Vec<Order> {
        self.registry.query(filter)
    }

    /// Post-trade report; `None` for unknown or unfilled orders
    #[must_use]
    pub fn get_execution_report(&self, order_id: OrderId) -> Option<ExecutionReport> {
        let (order, fills) = self.registry.order_with_fills(order_id)?;
        if order.status != OrderStatus::Filled {
            return None;
        }
        let catalog = self.catalog.snapshot();
        let venue = catalog.venue(&order.venue_id);
        let market = MarketContext {
            close_price: self.quotes.reference_price(&order.symbol),
            daily_volume: venue.map_or(0.0, |v| v.avg_daily_volume),
            session_secs: venue.map_or(SESSION_SECS, |v| v.hours.session_secs()),
        };
        ExecutionReport::build(&order, &fills, market, Utc::now())
    }

    /// All brokers
    #[must_use]
    pub fn get_brokers(&self) -> Vec<Broker> {
        self.catalog.snapshot().brokers.clone()
    }

    /// All venues
    #[must_use]
    pub fn get_venues(&self) -> Vec<Venue> {
        self.catalog.snapshot().venues.clone()
    }

    /// All execution algorithms
    #[must_use]
    pub fn get_algorithms(&self) -> Vec<ExecutionAlgorithm> {
        self.catalog.snapshot().algorithms.clone()
    }

    /// Depth snapshot around the current reference price
    pub fn get_order_book(
        &self,
        symbol: &Symbol,
        venue_id: Option<&str>,
    ) -> ExecutionResult<OrderBookSnapshot> {
        if symbol.is_empty() {
            return Err(ExecutionError::validation("symbol is required"));
        }
        let catalog = self.catalog.snapshot();
        let venue = match venue_id {
            Some(id) => Some(catalog.venue(id).ok_or_else(|| ExecutionError::VenueNotFound {
                venue: id.to_string(),
            })?),
            None => None,
        };
        Ok(OrderBookSnapshot::synthesize(
            symbol.clone(),
            self.quotes.reference_price(symbol),
            venue,
            Utc::now(),
        ))
    }

    /// Aggregates over orders matching a filter
    #[must_use]
    pub fn get_execution_statistics(&self, filter: &OrderFilter) -> ExecutionStatistics {
        let orders = self.registry.query(filter);
        ExecutionStatistics::from_orders(&orders)
    }

    /// Routing preview; creates nothing
    pub fn route(&self, request: &OrderRequest) -> ExecutionResult<RouteProposal> {
        validate_request(request, Utc::now())?;
        let catalog = self.catalog.snapshot();
        self.router.route(request, &catalog, self.quotes.as_ref())
    }

    /// Health report
    #[must_use]
    pub fn health(&self) -> EngineHealth {
        let catalog = self.catalog.snapshot();
        let active_brokers = catalog.brokers.iter().filter(|b| b.active).count();
        let active_venues = catalog.venues.iter().filter(|v| v.active).count();
        let now = Utc::now();
        let open_venues = catalog
            .venues
            .iter()
            .filter(|v| v.active && v.hours.is_open(now))
            .count();
        let status = if active_brokers > 0 && active_venues > 0 {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };
        EngineHealth {
            status,
            active_orders: self.registry.active_len(),
            total_orders: self.registry.len(),
            brokers: catalog.brokers.len(),
            active_brokers,
            venues: catalog.venues.len(),
            active_venues,
            open_venues,
            algorithms: catalog.algorithms.len(),
            uptime_secs: self.started.elapsed().as_secs(),
            metrics: self.metrics.snapshot(),
        }
    }
}

fn validate_modification(order: &Order, changes: &OrderModification) -> ExecutionResult<()> {
    if changes.is_empty() {
        return Err(ExecutionError::validation("modification requests no changes"));
    }
    if let Some(quantity) = changes.quantity {
        if !quantity.is_valid() {
            return Err(ExecutionError::validation(
                "quantity must be positive and finite",
            ));
        }
        if quantity.as_f64() <= order.filled_quantity.as_f64() {
            return Err(ExecutionError::validation(format!(
                "new quantity {} must exceed filled quantity {}",
                quantity, order.filled_quantity
            )));
        }
    }
    let protective = changes.protective.unwrap_or_default();
    let prices = [
        ("limit price", changes.limit_price),
        ("stop price", changes.stop_price),
        ("stop loss", protective.stop_loss),
        ("take profit", protective.take_profit),
        ("trailing offset", protective.trailing_offset),
    ];
    for (name, price) in prices {
        if price.is_some_and(|px| !px.is_valid()) {
            return Err(ExecutionError::validation(format!(
                "{name} must be positive and finite"
            )));
        }
    }
    if changes.limit_price.is_some() && order.limit_price.is_none() {
        return Err(ExecutionError::validation(format!(
            "{} order has no limit price to amend",
            order.order_type
        )));
    }
    if changes.stop_price.is_some() && order.stop_price.is_none() {
        return Err(ExecutionError::validation(format!(
            "{} order has no stop price to amend",
            order.order_type
        )));
    }
    Ok(())
}
