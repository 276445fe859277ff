//! Fill simulation and background reconciliation
//!
//! A [`FillModel`] decides whether a working order trades on a given pass.
//! The [`Reconciler`] owns the three periodic tasks (fill pass, status sweep,
//! cleanup sweep) and stops them on the shared shutdown signal.

use chrono::Utc;
use common::constants::BASIS_POINTS;
use common::{Px, Qty};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::FillModelConfig;
use crate::engine::ExecutionEngine;
use crate::order::{FillDraft, LiquidityFlag, Order, OrderId, OrderType};

/// Produces fills for working orders
pub trait FillModel: Send + Sync {
    /// Fill for `order` on this pass, if any; `reference` is the current quote
    fn next_fill(&self, order: &Order, reference: Px) -> Option<FillDraft>;
}

/// Random partial fills around the reference price
#[derive(Debug)]
pub struct RandomFillModel {
    config: FillModelConfig,
    rng: Mutex<StdRng>,
}

impl RandomFillModel {
    /// Create a model; `seed` makes it reproducible
    #[must_use]
    pub fn new(config: FillModelConfig, seed: Option<u64>) -> Self {
        let rng = seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
        Self {
            config,
            rng: Mutex::new(rng),
        }
    }
}

impl FillModel for RandomFillModel {
    fn next_fill(&self, order: &Order, reference: Px) -> Option<FillDraft> {
        let remaining = order.remaining().as_f64();
        if remaining <= 0.0 {
            return None;
        }

        let mut rng = self.rng.lock();
        if !rng.gen_bool(self.config.fill_probability.clamp(0.0, 1.0)) {
            return None;
        }

        let fraction = rng.gen_range(self.config.min_fill_fraction..=self.config.max_fill_fraction);
        let quantity = if remaining < 1.0 {
            remaining
        } else {
            (fraction * order.quantity.as_f64())
                .round()
                .max(1.0)
                .min(remaining)
        };

        let resting_limit = matches!(
            order.order_type,
            OrderType::Limit | OrderType::StopLimit | OrderType::Iceberg
        );
        let price = match order.limit_price {
            Some(limit) if resting_limit => limit,
            _ => {
                let base = order
                    .limit_price
                    .or(order.stop_price)
                    .filter(Px::is_valid)
                    .or_else(|| Some(reference).filter(Px::is_valid))
                    .unwrap_or(order.arrival_price);
                let band = self.config.slippage_band_bps / BASIS_POINTS;
                let shift = if band > 0.0 {
                    rng.gen_range(-band..=band)
                } else {
                    0.0
                };
                Px::new(base.as_f64() * (1.0 + shift))
            }
        };
        if !price.is_valid() {
            return None;
        }

        let liquidity = match order.order_type {
            OrderType::Limit => LiquidityFlag::Maker,
            OrderType::Market => LiquidityFlag::Taker,
            _ => LiquidityFlag::Unknown,
        };

        Some(FillDraft::new(Qty::new(quantity), price).with_liquidity(liquidity))
    }
}

/// Replays queued fills per order, for deterministic runs
#[derive(Debug, Default)]
pub struct ScriptedFills {
    queues: Mutex<FxHashMap<OrderId, VecDeque<FillDraft>>>,
}

impl ScriptedFills {
    /// Empty script
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a fill for an order; one is released per pass
    pub fn push(&self, order_id: OrderId, draft: FillDraft) {
        self.queues.lock().entry(order_id).or_default().push_back(draft);
    }

    /// Fills still queued for an order
    #[must_use]
    pub fn pending(&self, order_id: OrderId) -> usize {
        self.queues.lock().get(&order_id).map_or(0, VecDeque::len)
    }
}

impl FillModel for ScriptedFills {
    fn next_fill(&self, order: &Order, _reference: Px) -> Option<FillDraft> {
        self.queues.lock().get_mut(&order.id)?.pop_front()
    }
}

/// Background tasks driving fills, expiry and retention
#[derive(Debug)]
pub struct Reconciler {
    engine: Arc<ExecutionEngine>,
}

impl Reconciler {
    /// Create a reconciler over an engine
    #[must_use]
    pub const fn new(engine: Arc<ExecutionEngine>) -> Self {
        Self { engine }
    }

    /// Spawn the fill pass, status sweep and cleanup sweep
    pub fn spawn(&self, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        let config = self.engine.config();
        vec![
            spawn_periodic(
                "fill pass",
                config.fill_interval(),
                shutdown.subscribe(),
                Arc::clone(&self.engine),
                |engine| {
                    let summary = engine.run_fill_pass();
                    if summary.applied > 0 || summary.failed > 0 {
                        debug!("fill pass: {summary:?}");
                    }
                },
            ),
            spawn_periodic(
                "status sweep",
                config.status_sweep_interval(),
                shutdown.subscribe(),
                Arc::clone(&self.engine),
                |engine| {
                    let summary = engine.run_expiry_pass(Utc::now());
                    if summary.applied > 0 || summary.failed > 0 {
                        debug!("status sweep: {summary:?}");
                    }
                },
            ),
            spawn_periodic(
                "cleanup sweep",
                config.cleanup_interval(),
                shutdown.subscribe(),
                Arc::clone(&self.engine),
                |engine| {
                    let evicted = engine.run_cleanup_pass(Utc::now());
                    if evicted > 0 {
                        info!("cleanup sweep evicted {evicted} orders");
                    }
                },
            ),
        ]
    }
}

fn spawn_periodic<F>(
    name: &'static str,
    period: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
    engine: Arc<ExecutionEngine>,
    tick: F,
) -> JoinHandle<()>
where
    F: Fn(&ExecutionEngine) + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!("{name} started ({}ms)", period.as_millis());
        loop {
            tokio::select! {
                _ = interval.tick() => tick(engine.as_ref()),
                _ = shutdown_rx.recv() => {
                    info!("{name} stopping");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{OrderRequest, OrderStatus, Placement};
    use common::{InstrumentClass, Side};

    fn working(request: OrderRequest) -> Order {
        let mut order = Order::from_request(
            OrderId(3),
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
        order.status = OrderStatus::Submitted;
        order
    }

    fn always_fill() -> FillModelConfig {
        FillModelConfig {
            fill_probability: 1.0,
            ..FillModelConfig::default()
        }
    }

    #[test]
    fn test_random_fill_bounds() {
        let model = RandomFillModel::new(always_fill(), Some(7));
        let order = working(OrderRequest::market("A", "AAPL", Side::Buy, 1_000.0));
        for _ in 0..200 {
            let draft = model.next_fill(&order, Px::new(100.0)).unwrap();
            let qty = draft.quantity.as_f64();
            assert!((100.0..=500.0).contains(&qty), "{qty}");
            let px = draft.price.as_f64();
            assert!((99.9..=100.1).contains(&px), "{px}");
            assert_eq!(draft.liquidity, LiquidityFlag::Taker);
        }
    }

    #[test]
    fn test_random_fill_never_exceeds_remaining() {
        let model = RandomFillModel::new(always_fill(), Some(11));
        let mut order = working(OrderRequest::market("A", "AAPL", Side::Buy, 1_000.0));
        order.filled_quantity = Qty::new(990.0);
        for _ in 0..50 {
            let draft = model.next_fill(&order, Px::new(100.0)).unwrap();
            assert!(draft.quantity.as_f64() <= 10.0);
        }
    }

    #[test]
    fn test_limit_orders_fill_at_limit_as_maker() {
        let model = RandomFillModel::new(always_fill(), Some(1));
        let order = working(OrderRequest::limit("A", "AAPL", Side::Sell, 100.0, 101.5));
        let draft = model.next_fill(&order, Px::new(100.0)).unwrap();
        assert_eq!(draft.price, Px::new(101.5));
        assert_eq!(draft.liquidity, LiquidityFlag::Maker);
    }

    #[test]
    fn test_zero_probability_never_fills() {
        let config = FillModelConfig {
            fill_probability: 0.0,
            ..FillModelConfig::default()
        };
        let model = RandomFillModel::new(config, Some(5));
        let order = working(OrderRequest::market("A", "AAPL", Side::Buy, 10.0));
        assert!((0..100).all(|_| model.next_fill(&order, Px::new(1.0)).is_none()));
    }

    #[test]
    fn test_scripted_fills_replay_in_order() {
        let script = ScriptedFills::new();
        let order = working(OrderRequest::market("A", "AAPL", Side::Buy, 500.0));
        script.push(order.id, FillDraft::new(Qty::new(300.0), Px::new(101.0)));
        script.push(order.id, FillDraft::new(Qty::new(200.0), Px::new(99.0)));
        assert_eq!(script.pending(order.id), 2);
        assert_eq!(
            script.next_fill(&order, Px::ZERO).map(|d| d.quantity),
            Some(Qty::new(300.0))
        );
        assert_eq!(
            script.next_fill(&order, Px::ZERO).map(|d| d.quantity),
            Some(Qty::new(200.0))
        );
        assert!(script.next_fill(&order, Px::ZERO).is_none());
    }
}
