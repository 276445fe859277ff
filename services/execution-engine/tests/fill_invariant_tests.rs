//! Property tests for fill accounting
//!
//! Whatever sequence of fills arrives, the filled quantity stays within the
//! order quantity and the average price is the quantity-weighted mean of the
//! fills that were accepted.

use chrono::Utc;
use common::{InstrumentClass, Px, Qty, Side};
use execution_engine::order::Placement;
use execution_engine::registry::OrderRegistry;
use execution_engine::{FillDraft, Order, OrderId, OrderRequest, OrderStatus};
use proptest::prelude::*;

fn working_order(registry: &OrderRegistry, quantity: f64) -> OrderId {
    let id = registry.next_id();
    let order = Order::from_request(
        id,
        OrderRequest::market("ACC-P", "AAPL", Side::Buy, quantity),
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
    registry
        .mark_submitted(id, "BROKER-1".into(), Utc::now())
        .unwrap();
    id
}

proptest! {
    #[test]
    fn prop_filled_quantity_bounded_and_average_weighted(
        quantity in 1u32..5_000,
        fills in prop::collection::vec((1u32..2_000, 50.0f64..150.0), 1..20),
    ) {
        let registry = OrderRegistry::new();
        let quantity = f64::from(quantity);
        let id = working_order(&registry, quantity);

        let mut accepted_qty = 0.0;
        let mut accepted_notional = 0.0;
        for (fill_qty, price) in fills {
            let fill_qty = f64::from(fill_qty);
            let result = registry.apply_fill(
                id,
                FillDraft::new(Qty::new(fill_qty), Px::new(price)),
                |_, _| 0.0,
                Utc::now(),
            );
            if let Ok((fill, _)) = result {
                accepted_qty += fill.quantity.as_f64();
                accepted_notional += fill.quantity.as_f64() * fill.price.as_f64();
            }

            let order = registry.get(id).unwrap();
            let filled = order.filled_quantity.as_f64();
            prop_assert!(filled >= 0.0);
            prop_assert!(filled <= quantity + 1e-9);
            prop_assert!((filled - accepted_qty).abs() < 1e-6);
            if accepted_qty > 0.0 {
                let expected = accepted_notional / accepted_qty;
                prop_assert!((order.average_price.as_f64() - expected).abs() < 1e-6);
            }
        }

        let order = registry.get(id).unwrap();
        let expected_status = if accepted_qty >= quantity {
            OrderStatus::Filled
        } else if accepted_qty > 0.0 {
            OrderStatus::Partial
        } else {
            OrderStatus::Submitted
        };
        prop_assert_eq!(order.status, expected_status);
        let fills = registry.fills(id).unwrap();
        let fill_total: f64 = fills.iter().map(|f| f.quantity.as_f64()).sum();
        prop_assert!((fill_total - order.filled_quantity.as_f64()).abs() < 1e-6);
    }

    #[test]
    fn prop_terminal_orders_never_change(
        quantity in 1u32..1_000,
        extra in prop::collection::vec((1u32..100, 1.0f64..500.0), 1..10),
    ) {
        let registry = OrderRegistry::new();
        let quantity = f64::from(quantity);
        let id = working_order(&registry, quantity);
        let complete = FillDraft::new(Qty::new(quantity), Px::new(100.0));
        registry.apply_fill(id, complete, |_, _| 0.0, Utc::now()).unwrap();
        let filled = registry.get(id).unwrap();
        prop_assert_eq!(filled.status, OrderStatus::Filled);

        for (fill_qty, price) in extra {
            let result = registry.apply_fill(
                id,
                FillDraft::new(Qty::new(f64::from(fill_qty)), Px::new(price)),
                |_, _| 0.0,
                Utc::now(),
            );
            prop_assert!(result.is_err());
            prop_assert!(registry.cancel(id, Utc::now()).is_err());
        }
        prop_assert_eq!(registry.get(id).unwrap(), filled);
    }
}
