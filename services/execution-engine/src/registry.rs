//! Order registry
//!
//! The single owner of order and fill state. All mutation goes through the
//! methods here, each of which takes the write lock once, validates the
//! transition against [`OrderLifecycle`] and applies it atomically. The lock
//! is never held across an `.await`.

use chrono::{DateTime, Utc};
use common::constants::QTY_EPSILON;
use common::{Px, Qty};
use dashmap::DashMap;
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

use crate::error::{ExecutionError, ExecutionResult};
use crate::lifecycle::OrderLifecycle;
use crate::order::{
    FillDraft, Order, OrderFill, OrderFilter, OrderId, OrderModification, OrderStatus,
};

#[derive(Debug)]
struct OrderRecord {
    order: Order,
    fills: Vec<OrderFill>,
}

#[derive(Debug, Default)]
struct RegistryState {
    orders: FxHashMap<OrderId, OrderRecord>,
    active: FxHashSet<OrderId>,
}

impl RegistryState {
    fn record_mut(&mut self, order_id: OrderId) -> ExecutionResult<&mut OrderRecord> {
        self.orders
            .get_mut(&order_id)
            .ok_or(ExecutionError::OrderNotFound { order_id })
    }
}

/// In-memory store of orders and their fills
#[derive(Debug)]
pub struct OrderRegistry {
    state: RwLock<RegistryState>,
    /// Client order ID index
    by_client_id: DashMap<String, OrderId>,
    /// Order ID generator
    sequence: AtomicU64,
    lifecycle: OrderLifecycle,
}

impl Default for OrderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            by_client_id: DashMap::new(),
            sequence: AtomicU64::new(1),
            lifecycle: OrderLifecycle::new(),
        }
    }

    /// Allocate the next order ID
    pub fn next_id(&self) -> OrderId {
        OrderId(self.sequence.fetch_add(1, Ordering::Relaxed))
    }

    /// Lifecycle rules in force
    #[must_use]
    pub const fn lifecycle(&self) -> &OrderLifecycle {
        &self.lifecycle
    }

    /// Register a freshly created pending order
    pub fn insert(&self, order: Order) -> ExecutionResult<()> {
        if order.status != OrderStatus::Pending {
            return Err(ExecutionError::InvalidTransition {
                order_id: order.id,
                from: order.status,
                to: OrderStatus::Pending,
            });
        }

        let mut state = self.state.write();
        if state.orders.contains_key(&order.id) {
            return Err(ExecutionError::validation(format!(
                "order {} already exists",
                order.id
            )));
        }
        match self.by_client_id.entry(order.client_order_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(ExecutionError::validation(format!(
                    "duplicate client order id {}",
                    order.client_order_id
                )));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(order.id);
            }
        }

        debug!("Order {} registered ({})", order.id, order.client_order_id);
        state.active.insert(order.id);
        state.orders.insert(
            order.id,
            OrderRecord {
                order,
                fills: Vec::new(),
            },
        );
        Ok(())
    }

    /// True when an order with this ID is held
    #[must_use]
    pub fn contains(&self, order_id: OrderId) -> bool {
        self.state.read().orders.contains_key(&order_id)
    }

    /// Order snapshot
    #[must_use]
    pub fn get(&self, order_id: OrderId) -> Option<Order> {
        self.state
            .read()
            .orders
            .get(&order_id)
            .map(|r| r.order.clone())
    }

    /// Lookup by client order ID
    #[must_use]
    pub fn get_by_client_id(&self, client_order_id: &str) -> Option<Order> {
        let order_id = *self.by_client_id.get(client_order_id)?;
        self.get(order_id)
    }

    /// Fills of an order in application order
    #[must_use]
    pub fn fills(&self, order_id: OrderId) -> Option<Vec<OrderFill>> {
        self.state
            .read()
            .orders
            .get(&order_id)
            .map(|r| r.fills.clone())
    }

    /// Order together with its fills, read under one lock
    #[must_use]
    pub fn order_with_fills(&self, order_id: OrderId) -> Option<(Order, Vec<OrderFill>)> {
        self.state
            .read()
            .orders
            .get(&order_id)
            .map(|r| (r.order.clone(), r.fills.clone()))
    }

    fn transition(
        &self,
        order: &mut Order,
        to: OrderStatus,
        now: DateTime<Utc>,
    ) -> ExecutionResult<()> {
        self.lifecycle.validate_transition(order.id, order.status, to)?;
        order.status = to;
        order.updated_at = now;
        Ok(())
    }

    /// Broker acknowledged the order
    pub fn mark_submitted(
        &self,
        order_id: OrderId,
        broker_order_id: String,
        now: DateTime<Utc>,
    ) -> ExecutionResult<Order> {
        let mut state = self.state.write();
        let record = state.record_mut(order_id)?;
        self.transition(&mut record.order, OrderStatus::Submitted, now)?;
        record.order.broker_order_id = Some(broker_order_id);
        record.order.submitted_at = Some(now);
        info!("Order {} submitted to {}", order_id, record.order.broker_id);
        Ok(record.order.clone())
    }

    /// Broker or gateway refused the order
    pub fn mark_rejected(
        &self,
        order_id: OrderId,
        reason: String,
        now: DateTime<Utc>,
    ) -> ExecutionResult<Order> {
        let mut state = self.state.write();
        let record = state.record_mut(order_id)?;
        self.transition(&mut record.order, OrderStatus::Rejected, now)?;
        record.order.reject_reason = Some(reason);
        let order = record.order.clone();
        state.active.remove(&order_id);
        info!("Order {} rejected", order_id);
        Ok(order)
    }

    /// Apply one fill.
    ///
    /// `commission` prices the fill against the order under the same lock so
    /// concurrent fills for one order are applied strictly in sequence.
    pub fn apply_fill<F>(
        &self,
        order_id: OrderId,
        draft: FillDraft,
        commission: F,
        now: DateTime<Utc>,
    ) -> ExecutionResult<(OrderFill, Order)>
    where
        F: FnOnce(&Order, &FillDraft) -> f64,
    {
        let mut state = self.state.write();
        let record = state.record_mut(order_id)?;
        let order = &mut record.order;

        if !matches!(order.status, OrderStatus::Submitted | OrderStatus::Partial) {
            return Err(ExecutionError::FillRejected {
                order_id,
                reason: format!("order is {}", order.status),
            });
        }
        if !draft.quantity.is_valid() || !draft.price.is_valid() {
            return Err(ExecutionError::FillRejected {
                order_id,
                reason: "fill quantity and price must be positive and finite".to_string(),
            });
        }
        let remaining = order.remaining();
        if draft.quantity.as_f64() > remaining.as_f64() + QTY_EPSILON {
            return Err(ExecutionError::FillRejected {
                order_id,
                reason: format!("fill of {} exceeds remaining {}", draft.quantity, remaining),
            });
        }

        let prior = order.filled_quantity.as_f64();
        let qty = draft.quantity.as_f64().min(remaining.as_f64());
        let mut filled = prior + qty;
        let complete = filled >= order.quantity.as_f64() - QTY_EPSILON;
        if complete {
            filled = order.quantity.as_f64();
        }
        let target = if complete {
            OrderStatus::Filled
        } else {
            OrderStatus::Partial
        };

        let timestamp = draft.timestamp.unwrap_or(now);
        self.transition(order, target, timestamp)?;

        let fill_commission = commission(order, &draft);
        let average =
            (order.average_price.as_f64() * prior + draft.price.as_f64() * qty) / filled;
        order.filled_quantity = Qty::new(filled);
        order.average_price = Px::new(average);
        order.commission += fill_commission;
        order.slippage = (average - order.reference_price().as_f64()).abs();
        if complete {
            order.filled_at = Some(timestamp);
        }

        let fill = OrderFill {
            order_id,
            quantity: Qty::new(qty),
            price: draft.price,
            commission: fill_commission,
            venue_id: draft.venue_id.unwrap_or_else(|| order.venue_id.clone()),
            trade_id: draft
                .trade_id
                .unwrap_or_else(|| format!("T-{}-{}", order_id, record.fills.len() + 1)),
            timestamp,
            liquidity: draft.liquidity,
        };
        let snapshot = record.order.clone();
        record.fills.push(fill.clone());
        if complete {
            state.active.remove(&order_id);
        }

        info!(
            "Fill processed for order {}: {} @ {} ({})",
            order_id, fill.quantity, fill.price, snapshot.status
        );
        Ok((fill, snapshot))
    }

    /// Cancel a live order after the broker confirmed it
    pub fn cancel(&self, order_id: OrderId, now: DateTime<Utc>) -> ExecutionResult<Order> {
        let mut state = self.state.write();
        let record = state.record_mut(order_id)?;
        let status = record.order.status;
        if !OrderLifecycle::can_cancel(status) {
            return Err(ExecutionError::NotCancellable { order_id, status });
        }
        self.transition(&mut record.order, OrderStatus::Cancelled, now)?;
        record.order.cancelled_at = Some(now);
        let order = record.order.clone();
        state.active.remove(&order_id);
        info!("Order {} cancelled", order_id);
        Ok(order)
    }

    /// Apply an amendment the broker accepted
    pub fn modify(
        &self,
        order_id: OrderId,
        changes: &OrderModification,
        now: DateTime<Utc>,
    ) -> ExecutionResult<Order> {
        let mut state = self.state.write();
        let record = state.record_mut(order_id)?;
        let order = &mut record.order;
        if !OrderLifecycle::can_modify(order.status) {
            return Err(ExecutionError::NotModifiable {
                order_id,
                status: order.status,
            });
        }
        if let Some(quantity) = changes.quantity {
            if quantity.as_f64() <= order.filled_quantity.as_f64() + QTY_EPSILON {
                return Err(ExecutionError::validation(format!(
                    "new quantity {} must exceed filled quantity {}",
                    quantity, order.filled_quantity
                )));
            }
            order.quantity = quantity;
        }
        if let Some(price) = changes.limit_price {
            order.limit_price = Some(price);
        }
        if let Some(price) = changes.stop_price {
            order.stop_price = Some(price);
        }
        if let Some(protective) = changes.protective {
            order.protective = protective;
        }
        if let Some(notes) = &changes.notes {
            order.notes = Some(notes.clone());
        }
        if order.filled_quantity.is_positive() {
            order.slippage =
                (order.average_price.as_f64() - order.reference_price().as_f64()).abs();
        }
        order.updated_at = now;
        info!("Order {} modified", order_id);
        Ok(order.clone())
    }

    /// Expire one live order if its time in force has elapsed
    pub fn expire(&self, order_id: OrderId, now: DateTime<Utc>) -> ExecutionResult<Option<Order>> {
        let mut state = self.state.write();
        let record = state.record_mut(order_id)?;
        if !OrderLifecycle::should_expire(&record.order, now) {
            return Ok(None);
        }
        self.transition(&mut record.order, OrderStatus::Expired, now)?;
        let order = record.order.clone();
        state.active.remove(&order_id);
        info!("Order {} expired", order_id);
        Ok(Some(order))
    }

    /// IDs of every order in the active set
    #[must_use]
    pub fn active_ids(&self) -> Vec<OrderId> {
        let mut ids: Vec<OrderId> = self.state.read().active.iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Snapshots of active orders the broker has acknowledged
    #[must_use]
    pub fn working_orders(&self) -> Vec<Order> {
        let state = self.state.read();
        let mut orders: Vec<Order> = state
            .active
            .iter()
            .filter_map(|id| state.orders.get(id))
            .map(|r| r.order.clone())
            .filter(|o| matches!(o.status, OrderStatus::Submitted | OrderStatus::Partial))
            .collect();
        orders.sort_unstable_by_key(|o| o.id);
        orders
    }

    /// Orders matching `filter`, newest first
    #[must_use]
    pub fn query(&self, filter: &OrderFilter) -> Vec<Order> {
        let mut orders: Vec<Order> = self
            .state
            .read()
            .orders
            .values()
            .filter(|r| filter.matches(&r.order))
            .map(|r| r.order.clone())
            .collect();
        orders.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        if let Some(limit) = filter.limit {
            orders.truncate(limit);
        }
        orders
    }

    /// Drop terminal orders last updated before `cutoff`, with their fills
    pub fn evict_terminal(&self, cutoff: DateTime<Utc>) -> Vec<OrderId> {
        let mut state = self.state.write();
        let stale: Vec<OrderId> = state
            .orders
            .values()
            .filter(|r| r.order.is_terminal() && r.order.updated_at < cutoff)
            .map(|r| r.order.id)
            .collect();
        for order_id in &stale {
            if let Some(record) = state.orders.remove(order_id) {
                self.by_client_id.remove(&record.order.client_order_id);
            }
            state.active.remove(order_id);
        }
        if !stale.is_empty() {
            debug!("Evicted {} terminal orders", stale.len());
        }
        stale
    }

    /// Total orders held
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().orders.len()
    }

    /// True when no orders are held
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().orders.is_empty()
    }

    /// Size of the active set
    #[must_use]
    pub fn active_len(&self) -> usize {
        self.state.read().active.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{OrderRequest, Placement};
    use chrono::Duration;
    use common::{InstrumentClass, Side};

    fn pending(registry: &OrderRegistry, quantity: f64, limit: Option<f64>) -> OrderId {
        let id = registry.next_id();
        let mut request = OrderRequest::market("ACC", "AAPL", Side::Buy, quantity);
        if let Some(px) = limit {
            request = OrderRequest::limit("ACC", "AAPL", Side::Buy, quantity, px);
        }
        let order = Order::from_request(
            id,
            request,
            InstrumentClass::Equity,
            Placement {
                broker_id: "alpaca".into(),
                venue_id: "NYSE".into(),
                arrival_price: Px::new(100.0),
                expires_at: None,
                algorithm: None,
            },
            Utc::now(),
        );
        registry.insert(order).unwrap();
        id
    }

    fn submitted(registry: &OrderRegistry, quantity: f64) -> OrderId {
        let id = pending(registry, quantity, None);
        registry.mark_submitted(id, "B-1".into(), Utc::now()).unwrap();
        id
    }

    fn no_commission(_: &Order, _: &FillDraft) -> f64 {
        0.0
    }

    fn fill_at(
        registry: &OrderRegistry,
        id: OrderId,
        quantity: f64,
        price: f64,
    ) -> ExecutionResult<(OrderFill, Order)> {
        let draft = FillDraft::new(Qty::new(quantity), Px::new(price));
        registry.apply_fill(id, draft, no_commission, Utc::now())
    }

    #[test]
    fn test_insert_and_lookup() {
        let registry = OrderRegistry::new();
        let id = pending(&registry, 10.0, None);
        let order = registry.get(id).unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(registry.active_len(), 1);
        assert_eq!(
            registry.get_by_client_id(&order.client_order_id).map(|o| o.id),
            Some(id)
        );
    }

    #[test]
    fn test_incremental_average_price() {
        let registry = OrderRegistry::new();
        let id = submitted(&registry, 500.0);

        let (_, order) = fill_at(&registry, id, 300.0, 101.0).unwrap();
        assert_eq!(order.status, OrderStatus::Partial);
        assert!((order.average_price.as_f64() - 101.0).abs() < 1e-9);

        let (_, order) = fill_at(&registry, id, 200.0, 99.0).unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.filled_quantity, Qty::new(500.0));
        assert!((order.average_price.as_f64() - 100.2).abs() < 1e-9);
        assert!(order.filled_at.is_some());
        assert_eq!(registry.active_len(), 0);
        assert_eq!(registry.fills(id).map(|f| f.len()), Some(2));
    }

    #[test]
    fn test_overfill_rejected_without_mutation() {
        let registry = OrderRegistry::new();
        let id = submitted(&registry, 100.0);
        let before = registry.get(id).unwrap();
        let result = fill_at(&registry, id, 150.0, 10.0);
        assert!(matches!(result, Err(ExecutionError::FillRejected { .. })));
        assert_eq!(registry.get(id).unwrap(), before);
    }

    #[test]
    fn test_fill_on_pending_rejected() {
        let registry = OrderRegistry::new();
        let id = pending(&registry, 100.0, None);
        let result = fill_at(&registry, id, 10.0, 10.0);
        assert!(result.is_err());
    }

    #[test]
    fn test_slippage_against_limit() {
        let registry = OrderRegistry::new();
        let id = pending(&registry, 10.0, Some(50.0));
        registry.mark_submitted(id, "B".into(), Utc::now()).unwrap();
        let (_, order) = fill_at(&registry, id, 10.0, 50.5).unwrap();
        assert!((order.slippage - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_cancel_terminal_is_refused() {
        let registry = OrderRegistry::new();
        let id = submitted(&registry, 10.0);
        fill_at(&registry, id, 10.0, 10.0).unwrap();
        let result = registry.cancel(id, Utc::now());
        assert!(matches!(
            result,
            Err(ExecutionError::NotCancellable {
                status: OrderStatus::Filled,
                ..
            })
        ));
    }

    #[test]
    fn test_modify_quantity_must_exceed_filled() {
        let registry = OrderRegistry::new();
        let id = submitted(&registry, 100.0);
        fill_at(&registry, id, 40.0, 10.0).unwrap();
        let shrink = OrderModification {
            quantity: Some(Qty::new(40.0)),
            ..OrderModification::default()
        };
        assert!(registry.modify(id, &shrink, Utc::now()).is_err());

        let grow = OrderModification {
            quantity: Some(Qty::new(60.0)),
            ..OrderModification::default()
        };
        let order = registry.modify(id, &grow, Utc::now()).unwrap();
        assert_eq!(order.quantity, Qty::new(60.0));
        assert_eq!(order.status, OrderStatus::Partial);
    }

    #[test]
    fn test_expire_and_evict() {
        let registry = OrderRegistry::new();
        let id = submitted(&registry, 10.0);
        let now = Utc::now();

        assert!(registry.expire(id, now).unwrap().is_none());

        {
            let mut state = registry.state.write();
            let record = state.orders.get_mut(&id).unwrap();
            record.order.expires_at = Some(now - Duration::seconds(1));
        }
        let expired = registry.expire(id, now).unwrap().unwrap();
        assert_eq!(expired.status, OrderStatus::Expired);
        assert_eq!(registry.active_len(), 0);

        assert!(registry.evict_terminal(now - Duration::hours(1)).is_empty());
        assert_eq!(registry.evict_terminal(now + Duration::hours(25)), vec![id]);
        assert!(registry.get(id).is_none());
        assert!(registry.fills(id).is_none());
    }

    #[test]
    fn test_query_newest_first() {
        let registry = OrderRegistry::new();
        let a = pending(&registry, 1.0, None);
        let b = pending(&registry, 2.0, None);
        let c = pending(&registry, 3.0, None);
        let ids: Vec<OrderId> = registry.query(&OrderFilter::all()).iter().map(|o| o.id).collect();
        // creation timestamps may tie; ids break the tie
        assert_eq!(ids, vec![c, b, a]);

        let limited = registry.query(&OrderFilter {
            limit: Some(1),
            ..OrderFilter::default()
        });
        assert_eq!(limited.len(), 1);
    }
}
