//! Routing and lifecycle rule tests

mod support;

use chrono::{Duration, TimeZone, Utc};
use common::{InstrumentClass, Side};
use execution_engine::lifecycle::{OrderLifecycle, compute_expiry};
use execution_engine::{
    ErrorKind, ExecutionError, OrderRequest, OrderStatus, OrderType, TimeInForce,
};
use pretty_assertions::assert_eq;
use rstest::*;
use tokio_test::{assert_ok, block_on};

use support::{TestHarness, harness, market_buy};

#[rstest]
#[case(OrderStatus::Pending, OrderStatus::Submitted, true)]
#[case(OrderStatus::Pending, OrderStatus::Rejected, true)]
#[case(OrderStatus::Submitted, OrderStatus::Partial, true)]
#[case(OrderStatus::Submitted, OrderStatus::Expired, true)]
#[case(OrderStatus::Partial, OrderStatus::Partial, true)]
#[case(OrderStatus::Partial, OrderStatus::Cancelled, true)]
#[case(OrderStatus::Pending, OrderStatus::Filled, false)]
#[case(OrderStatus::Submitted, OrderStatus::Pending, false)]
#[case(OrderStatus::Filled, OrderStatus::Cancelled, false)]
#[case(OrderStatus::Cancelled, OrderStatus::Submitted, false)]
#[case(OrderStatus::Rejected, OrderStatus::Submitted, false)]
#[case(OrderStatus::Expired, OrderStatus::Partial, false)]
fn test_transition_table(#[case] from: OrderStatus, #[case] to: OrderStatus, #[case] valid: bool) {
    let lifecycle = OrderLifecycle::new();
    assert_eq!(lifecycle.is_valid_transition(from, to), valid);
}

#[rstest]
fn test_terminal_states_have_no_exits() {
    let lifecycle = OrderLifecycle::new();
    for status in [
        OrderStatus::Filled,
        OrderStatus::Cancelled,
        OrderStatus::Rejected,
        OrderStatus::Expired,
    ] {
        assert!(status.is_terminal());
        assert!(lifecycle.next_states(status).is_empty());
        assert!(!OrderLifecycle::can_cancel(status));
        assert!(!OrderLifecycle::can_modify(status));
    }
}

#[rstest]
fn test_day_orders_expire_at_next_utc_midnight() {
    let created = Utc.with_ymd_and_hms(2024, 3, 14, 15, 30, 0).unwrap();
    let expiry = compute_expiry(TimeInForce::Day, None, created, Duration::seconds(5));
    assert_eq!(expiry, Some(Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap()));
    assert_eq!(
        compute_expiry(TimeInForce::Gtc, None, created, Duration::seconds(5)),
        None
    );
    assert_eq!(
        compute_expiry(TimeInForce::Fok, None, created, Duration::seconds(5)),
        Some(created + Duration::seconds(5))
    );
}

#[rstest]
fn test_routing_is_deterministic(harness: TestHarness) {
    let request = market_buy("AAPL", 1_000.0);
    let first = harness.engine.route(&request).unwrap();
    let second = harness.engine.route(&request).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.instrument_class, InstrumentClass::Equity);
    assert!(first.routes.windows(2).all(|w| w[0].score >= w[1].score));
    assert!(first.confidence > 0.0 && first.confidence <= 1.0);
}

#[rstest]
fn test_route_preview_creates_nothing(harness: TestHarness) {
    harness.engine.route(&market_buy("MSFT", 10.0)).unwrap();
    assert_eq!(harness.engine.health().total_orders, 0);
    assert_eq!(harness.gateway.submit_count(), 0);
}

#[rstest]
#[case::equity("AAPL", InstrumentClass::Equity, &["interactive_brokers", "alpaca", "schwab"])]
#[case::crypto("BTCUSDT", InstrumentClass::Crypto, &["alpaca", "binance"])]
fn test_routes_stay_within_class(
    harness: TestHarness,
    #[case] symbol: &str,
    #[case] class: InstrumentClass,
    #[case] brokers: &[&str],
) {
    let proposal = harness.engine.route(&market_buy(symbol, 1.0)).unwrap();
    assert_eq!(proposal.instrument_class, class);
    let catalog = harness.engine.catalog().snapshot();
    for route in &proposal.routes {
        assert!(brokers.contains(&route.broker_id.as_str()), "{}", route.broker_id);
        let venue = catalog.venue(&route.venue_id).unwrap();
        assert!(venue.lists_class(class));
    }
}

#[rstest]
fn test_disabled_broker_is_not_routed(harness: TestHarness) {
    let before = harness.engine.route(&market_buy("AAPL", 100.0)).unwrap();
    let best = before.best().unwrap().broker_id.clone();

    assert_ok!(harness.engine.catalog().set_broker_active(&best, false));
    let after = harness.engine.route(&market_buy("AAPL", 100.0)).unwrap();
    assert!(after.routes.iter().all(|r| r.broker_id != best));

    let order = block_on(harness.submit(market_buy("AAPL", 100.0)));
    assert_ne!(order.broker_id, best);
}

#[rstest]
fn test_unknown_broker_toggle(harness: TestHarness) {
    let err = harness
        .engine
        .catalog()
        .set_broker_active("nobody", false)
        .unwrap_err();
    assert!(matches!(err, ExecutionError::BrokerNotFound { .. }));
}

#[rstest]
fn test_algorithmic_order_schedule(harness: TestHarness) {
    let request = OrderRequest::new("ACC-1", "MSFT", Side::Buy, OrderType::Vwap, 10_000.0)
        .with_param("duration_minutes", 30.0);
    let proposal = harness.engine.route(&request).unwrap();
    assert_eq!(proposal.algorithm.as_deref(), Some("vwap"));
    assert!(!proposal.schedule.is_empty());
    let scheduled: f64 = proposal.schedule.iter().map(|s| s.quantity).sum();
    assert!((scheduled - 10_000.0).abs() < 1e-6);
}

#[rstest]
fn test_ioc_rejected_for_algorithmic_orders(harness: TestHarness) {
    let request = OrderRequest::new("ACC-1", "MSFT", Side::Buy, OrderType::Twap, 100.0)
        .with_time_in_force(TimeInForce::Ioc);
    let err = harness.engine.route(&request).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[rstest]
#[case::endless("duration_minutes", 1.0e12)]
#[case::instant("duration_minutes", 0.0)]
#[case::over_participation("participation_rate", 2.0)]
fn test_out_of_range_algorithm_params(
    harness: TestHarness,
    #[case] key: &str,
    #[case] value: f64,
) {
    let request = OrderRequest::new("ACC-1", "MSFT", Side::Buy, OrderType::Twap, 600.0)
        .with_param(key, value);
    let err = harness.engine.route(&request).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = block_on(harness.engine.create_order(request)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(harness.engine.health().total_orders, 0);
    assert_eq!(harness.gateway.submit_count(), 0);
}

#[rstest]
fn test_longest_schedule_is_one_day(harness: TestHarness) {
    let request = OrderRequest::new("ACC-1", "MSFT", Side::Buy, OrderType::Twap, 600.0)
        .with_param("duration_minutes", 1_440.0);
    let proposal = harness.engine.route(&request).unwrap();
    assert!(proposal.schedule.len() <= 1_440);
    let scheduled: f64 = proposal.schedule.iter().map(|s| s.quantity).sum();
    assert!((scheduled - 600.0).abs() < 1e-6);
}

#[rstest]
fn test_gtd_requires_future_expiry(harness: TestHarness) {
    let past = market_buy("AAPL", 10.0).good_till(Utc::now() - Duration::hours(1));
    assert_eq!(
        harness.engine.route(&past).unwrap_err().kind(),
        ErrorKind::Validation
    );
    let future = market_buy("AAPL", 10.0).good_till(Utc::now() + Duration::hours(1));
    assert!(harness.engine.route(&future).is_ok());
}
