//! Order lifecycle management
//!
//! Owns the transition table, structural request validation and the
//! time-in-force expiry rules. Nothing here touches shared state.

use chrono::{DateTime, Days, Duration, Utc};
use std::collections::HashMap;
use tracing::debug;

use crate::algorithms::validate_params;
use crate::error::{ExecutionError, ExecutionResult};
use crate::order::{Order, OrderId, OrderRequest, OrderStatus, TimeInForce};

/// Order lifecycle state machine
#[derive(Debug, Clone)]
pub struct OrderLifecycle {
    /// Valid state transitions
    valid_transitions: HashMap<OrderStatus, Vec<OrderStatus>>,
}

impl Default for OrderLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderLifecycle {
    /// Create the lifecycle with the standard transition table
    #[must_use]
    pub fn new() -> Self {
        let mut valid_transitions = HashMap::new();

        valid_transitions.insert(
            OrderStatus::Pending,
            vec![OrderStatus::Submitted, OrderStatus::Rejected],
        );
        valid_transitions.insert(
            OrderStatus::Submitted,
            vec![
                OrderStatus::Partial,
                OrderStatus::Filled,
                OrderStatus::Cancelled,
                OrderStatus::Expired,
            ],
        );
        // partial -> partial covers every further fill short of completion
        valid_transitions.insert(
            OrderStatus::Partial,
            vec![
                OrderStatus::Partial,
                OrderStatus::Filled,
                OrderStatus::Cancelled,
                OrderStatus::Expired,
            ],
        );

        valid_transitions.insert(OrderStatus::Filled, vec![]);
        valid_transitions.insert(OrderStatus::Cancelled, vec![]);
        valid_transitions.insert(OrderStatus::Rejected, vec![]);
        valid_transitions.insert(OrderStatus::Expired, vec![]);

        Self { valid_transitions }
    }

    /// True when `from -> to` is an edge of the table
    #[must_use]
    pub fn is_valid_transition(&self, from: OrderStatus, to: OrderStatus) -> bool {
        self.valid_transitions
            .get(&from)
            .is_some_and(|next| next.contains(&to))
    }

    /// Validate a state transition
    pub fn validate_transition(
        &self,
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> ExecutionResult<()> {
        if self.is_valid_transition(from, to) {
            debug!("Order {}: valid transition {} -> {}", order_id, from, to);
            return Ok(());
        }
        Err(ExecutionError::InvalidTransition { order_id, from, to })
    }

    /// States reachable in one step
    #[must_use]
    pub fn next_states(&self, from: OrderStatus) -> &[OrderStatus] {
        self.valid_transitions
            .get(&from)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Check if an order in `status` can be cancelled at the broker
    #[must_use]
    pub const fn can_cancel(status: OrderStatus) -> bool {
        matches!(status, OrderStatus::Submitted | OrderStatus::Partial)
    }

    /// Check if an order in `status` can be amended
    #[must_use]
    pub const fn can_modify(status: OrderStatus) -> bool {
        matches!(status, OrderStatus::Submitted | OrderStatus::Partial)
    }

    /// Check if a live order has run past its expiry
    #[must_use]
    pub fn should_expire(order: &Order, now: DateTime<Utc>) -> bool {
        matches!(order.status, OrderStatus::Submitted | OrderStatus::Partial)
            && order.expires_at.is_some_and(|at| at <= now)
    }
}

/// Expiry implied by the time in force
#[must_use]
pub fn compute_expiry(
    time_in_force: TimeInForce,
    requested: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    ioc_window: Duration,
) -> Option<DateTime<Utc>> {
    match time_in_force {
        TimeInForce::Gtc => None,
        TimeInForce::Gtd => requested,
        TimeInForce::Ioc | TimeInForce::Fok => Some(created_at + ioc_window),
        TimeInForce::Day => created_at
            .date_naive()
            .checked_add_days(Days::new(1))
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|midnight| midnight.and_utc()),
    }
}

/// Structural validation run before routing or any state change
pub fn validate_request(request: &OrderRequest, now: DateTime<Utc>) -> ExecutionResult<()> {
    if !request.quantity.is_valid() {
        return Err(ExecutionError::validation(
            "quantity must be positive and finite",
        ));
    }

    let prices = [
        ("limit price", request.limit_price),
        ("stop price", request.stop_price),
        ("stop loss", request.protective.stop_loss),
        ("take profit", request.protective.take_profit),
        ("trailing offset", request.protective.trailing_offset),
    ];
    for (name, price) in prices {
        if let Some(px) = price {
            if !px.is_valid() {
                return Err(ExecutionError::validation(format!(
                    "{name} must be positive and finite"
                )));
            }
        }
    }
    for (name, value) in &request.algorithm_params {
        if !value.is_finite() {
            return Err(ExecutionError::validation(format!(
                "algorithm parameter {name} must be finite"
            )));
        }
    }
    validate_params(&request.algorithm_params)?;

    let order_type = request.order_type;
    if order_type.requires_limit_price() && request.limit_price.is_none() {
        return Err(ExecutionError::validation(format!(
            "{order_type} order requires a limit price"
        )));
    }
    if order_type.requires_stop_price() && request.stop_price.is_none() {
        return Err(ExecutionError::validation(format!(
            "{order_type} order requires a stop price"
        )));
    }
    if order_type == crate::order::OrderType::TrailingStop
        && request.protective.trailing_offset.is_none()
    {
        return Err(ExecutionError::validation(
            "trailing_stop order requires a trailing offset",
        ));
    }

    match (request.time_in_force, request.expire_at) {
        (TimeInForce::Gtd, None) => {
            return Err(ExecutionError::validation("gtd order requires an expiry"));
        }
        (TimeInForce::Gtd, Some(at)) if at <= now => {
            return Err(ExecutionError::validation("gtd expiry must be in the future"));
        }
        (TimeInForce::Gtd, Some(_)) | (_, None) => {}
        (tif, Some(_)) => {
            return Err(ExecutionError::validation(format!(
                "expiry is only valid for gtd orders, not {}",
                tif.as_str()
            )));
        }
    }

    if matches!(request.time_in_force, TimeInForce::Ioc | TimeInForce::Fok)
        && order_type.is_algorithmic()
    {
        return Err(ExecutionError::validation(format!(
            "{} is not allowed on {order_type} orders",
            request.time_in_force.as_str()
        )));
    }

    if request.account_id.trim().is_empty() {
        return Err(ExecutionError::validation("account is required"));
    }
    if request.symbol.is_empty() {
        return Err(ExecutionError::validation("symbol is required"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::OrderType;
    use chrono::TimeZone;
    use common::Side;
    use rstest::rstest;

    #[rstest]
    #[case(OrderStatus::Pending, OrderStatus::Submitted, true)]
    #[case(OrderStatus::Pending, OrderStatus::Rejected, true)]
    #[case(OrderStatus::Pending, OrderStatus::Filled, false)]
    #[case(OrderStatus::Submitted, OrderStatus::Expired, true)]
    #[case(OrderStatus::Partial, OrderStatus::Partial, true)]
    #[case(OrderStatus::Partial, OrderStatus::Submitted, false)]
    #[case(OrderStatus::Filled, OrderStatus::Cancelled, false)]
    #[case(OrderStatus::Rejected, OrderStatus::Submitted, false)]
    fn test_transition_table(
        #[case] from: OrderStatus,
        #[case] to: OrderStatus,
        #[case] allowed: bool,
    ) {
        let lifecycle = OrderLifecycle::new();
        assert_eq!(lifecycle.is_valid_transition(from, to), allowed);
        assert_eq!(
            lifecycle.validate_transition(OrderId(1), from, to).is_ok(),
            allowed
        );
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        let lifecycle = OrderLifecycle::new();
        for status in [
            OrderStatus::Filled,
            OrderStatus::Cancelled,
            OrderStatus::Rejected,
            OrderStatus::Expired,
        ] {
            assert!(lifecycle.next_states(status).is_empty());
        }
    }

    #[test]
    fn test_day_expiry_is_next_midnight() {
        let created = Utc.with_ymd_and_hms(2024, 3, 4, 15, 30, 0).unwrap();
        let expiry = compute_expiry(TimeInForce::Day, None, created, Duration::seconds(5));
        assert_eq!(expiry, Some(Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap()));
    }

    #[test]
    fn test_ioc_and_gtc_expiry() {
        let created = Utc.with_ymd_and_hms(2024, 3, 4, 15, 30, 0).unwrap();
        let window = Duration::seconds(5);
        assert_eq!(
            compute_expiry(TimeInForce::Ioc, None, created, window),
            Some(created + window)
        );
        assert_eq!(compute_expiry(TimeInForce::Gtc, None, created, window), None);
    }

    #[rstest]
    #[case::zero_qty(OrderRequest::market("A", "AAPL", Side::Buy, 0.0))]
    #[case::negative_qty(OrderRequest::market("A", "AAPL", Side::Buy, -5.0))]
    #[case::nan_qty(OrderRequest::market("A", "AAPL", Side::Buy, f64::NAN))]
    #[case::negative_limit(OrderRequest::limit("A", "AAPL", Side::Buy, 10.0, -1.0))]
    #[case::missing_limit(OrderRequest::new("A", "AAPL", Side::Buy, OrderType::Limit, 10.0))]
    #[case::missing_stop(OrderRequest::new("A", "AAPL", Side::Sell, OrderType::Stop, 10.0))]
    #[case::missing_trail(
        OrderRequest::new("A", "AAPL", Side::Sell, OrderType::TrailingStop, 10.0)
    )]
    #[case::ioc_algo(
        OrderRequest::new("A", "AAPL", Side::Buy, OrderType::Twap, 10.0)
            .with_time_in_force(TimeInForce::Ioc)
    )]
    #[case::gtd_without_expiry(
        OrderRequest::market("A", "AAPL", Side::Buy, 10.0).with_time_in_force(TimeInForce::Gtd)
    )]
    #[case::empty_account(OrderRequest::market(" ", "AAPL", Side::Buy, 10.0))]
    #[case::empty_symbol(OrderRequest::market("A", "  ", Side::Buy, 10.0))]
    #[case::endless_twap(
        OrderRequest::new("A", "AAPL", Side::Buy, OrderType::Twap, 600.0)
            .with_param("duration_minutes", 1.0e12)
    )]
    fn test_invalid_requests(#[case] request: OrderRequest) {
        let err = validate_request(&request, Utc::now());
        assert!(matches!(err, Err(ExecutionError::Validation { .. })), "{err:?}");
    }

    #[test]
    fn test_gtd_expiry_must_be_future() {
        let now = Utc::now();
        let past =
            OrderRequest::market("A", "AAPL", Side::Buy, 10.0).good_till(now - Duration::hours(1));
        assert!(validate_request(&past, now).is_err());

        let future =
            OrderRequest::market("A", "AAPL", Side::Buy, 10.0).good_till(now + Duration::hours(1));
        assert!(validate_request(&future, now).is_ok());
    }

    #[test]
    fn test_valid_stop_limit() {
        let request = OrderRequest::new("A", "MSFT", Side::Sell, OrderType::StopLimit, 50.0)
            .with_limit_price(300.0)
            .with_stop_price(301.0);
        assert!(validate_request(&request, Utc::now()).is_ok());
    }
}
