//! Broker gateway seam
//!
//! [`BrokerGateway`] is the only way orders leave the engine. The engine
//! always talks to it through [`ExecutionGateway`], which shapes the
//! broker payload and bounds every call with a hard timeout.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::catalog::Broker;
use crate::error::{ExecutionError, ExecutionResult, GatewayError};
use crate::order::{Order, OrderId, OrderModification, OrderType, TimeInForce};

/// Broker-facing representation of an order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionPayload {
    pub order_id: OrderId,
    pub client_order_id: String,
    pub account_id: String,
    pub symbol: String,
    pub side: String,
    /// Broker order type code
    pub order_type: String,
    pub quantity: f64,
    pub limit_price: Option<f64>,
    pub stop_price: Option<f64>,
    pub trailing_offset: Option<f64>,
    /// Broker time in force code
    pub time_in_force: String,
    pub expire_at: Option<DateTime<Utc>>,
    pub venue_id: String,
}

impl SubmissionPayload {
    /// Shape an order for a specific broker
    #[must_use]
    pub fn from_order(order: &Order, broker: &Broker) -> Self {
        Self {
            order_id: order.id,
            client_order_id: order.client_order_id.clone(),
            account_id: order.account_id.clone(),
            symbol: order.symbol.to_string(),
            side: order.side.to_string().to_ascii_uppercase(),
            order_type: order_type_code(&broker.id, order.order_type).to_string(),
            quantity: order.quantity.as_f64(),
            limit_price: order.limit_price.map(|p| p.as_f64()),
            stop_price: order.stop_price.map(|p| p.as_f64()),
            trailing_offset: order.protective.trailing_offset.map(|p| p.as_f64()),
            time_in_force: tif_code(&broker.id, order.time_in_force).to_string(),
            expire_at: order.expires_at,
            venue_id: order.venue_id.clone(),
        }
    }
}

fn order_type_code(broker_id: &str, order_type: OrderType) -> &'static str {
    match broker_id {
        "interactive_brokers" => match order_type {
            OrderType::Market => "MKT",
            OrderType::Limit => "LMT",
            OrderType::Stop => "STP",
            OrderType::StopLimit => "STP LMT",
            OrderType::TrailingStop => "TRAIL",
            OrderType::Iceberg => "LMT+ICE",
            OrderType::Twap => "TWAP",
            OrderType::Vwap => "VWAP",
            OrderType::Pov => "PCTVOL",
        },
        "binance" => match order_type {
            OrderType::Market => "MARKET",
            OrderType::Limit | OrderType::Iceberg => "LIMIT",
            OrderType::Stop => "STOP_LOSS",
            OrderType::StopLimit => "STOP_LOSS_LIMIT",
            OrderType::TrailingStop => "TRAILING_STOP_MARKET",
            OrderType::Twap => "TWAP",
            OrderType::Vwap => "VWAP",
            OrderType::Pov => "POV",
        },
        _ => order_type.as_str(),
    }
}

fn tif_code(broker_id: &str, tif: TimeInForce) -> &'static str {
    match (broker_id, tif) {
        ("interactive_brokers", TimeInForce::Gtd) => "GTD",
        ("interactive_brokers" | "binance", TimeInForce::Gtc) => "GTC",
        ("interactive_brokers" | "binance", TimeInForce::Ioc) => "IOC",
        ("interactive_brokers" | "binance", TimeInForce::Fok) => "FOK",
        ("interactive_brokers" | "binance", TimeInForce::Day) => "DAY",
        (_, tif) => tif.as_str(),
    }
}

/// Broker connectivity
#[async_trait]
pub trait BrokerGateway: Send + Sync {
    /// Submit an order; returns the broker order ID
    async fn submit(
        &self,
        payload: &SubmissionPayload,
        broker: &Broker,
    ) -> Result<String, GatewayError>;

    /// Request cancellation; true when the broker confirmed
    async fn cancel(&self, order: &Order, broker: &Broker) -> bool;

    /// Request an amendment; true when the broker accepted
    async fn modify(&self, order: &Order, changes: &OrderModification, broker: &Broker) -> bool;
}

/// Timeout-bounded front for a [`BrokerGateway`]
#[derive(Clone)]
pub struct ExecutionGateway {
    inner: Arc<dyn BrokerGateway>,
    timeout: Duration,
}

impl std::fmt::Debug for ExecutionGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionGateway")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ExecutionGateway {
    /// Wrap a gateway implementation
    pub fn new(inner: Arc<dyn BrokerGateway>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    fn timeout_ms(&self) -> u64 {
        u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)
    }

    /// Submit an order; timeouts and refusals both surface as errors
    pub async fn submit(&self, order: &Order, broker: &Broker) -> ExecutionResult<String> {
        let payload = SubmissionPayload::from_order(order, broker);
        debug!(
            "Submitting order {} to {} as {} {}",
            order.id, broker.id, payload.order_type, payload.time_in_force
        );
        match tokio::time::timeout(self.timeout, self.inner.submit(&payload, broker)).await {
            Ok(Ok(broker_order_id)) => Ok(broker_order_id),
            Ok(Err(err)) => Err(ExecutionError::BrokerRejected {
                order_id: order.id,
                broker: broker.id.clone(),
                reason: err.to_string(),
            }),
            Err(_) => {
                warn!("Submission of order {} to {} timed out", order.id, broker.id);
                Err(ExecutionError::GatewayTimeout {
                    order_id: order.id,
                    broker: broker.id.clone(),
                    timeout_ms: self.timeout_ms(),
                })
            }
        }
    }

    /// Cancel at the broker; false without a broker order ID or on timeout
    pub async fn cancel(&self, order: &Order, broker: &Broker) -> bool {
        if order.broker_order_id.is_none() {
            return false;
        }
        match tokio::time::timeout(self.timeout, self.inner.cancel(order, broker)).await {
            Ok(confirmed) => confirmed,
            Err(_) => {
                warn!("Cancel of order {} at {} timed out", order.id, broker.id);
                false
            }
        }
    }

    /// Amend at the broker; false without a broker order ID or on timeout
    pub async fn modify(
        &self,
        order: &Order,
        changes: &OrderModification,
        broker: &Broker,
    ) -> bool {
        if order.broker_order_id.is_none() {
            return false;
        }
        match tokio::time::timeout(self.timeout, self.inner.modify(order, changes, broker)).await {
            Ok(accepted) => accepted,
            Err(_) => {
                warn!("Modify of order {} at {} timed out", order.id, broker.id);
                false
            }
        }
    }
}

/// Randomised broker stand-in
#[derive(Debug)]
pub struct SimulatedBrokerGateway {
    rng: Mutex<StdRng>,
    modify_success_rate: f64,
}

impl SimulatedBrokerGateway {
    /// Create a simulator; `seed` makes outcomes reproducible
    #[must_use]
    pub fn new(modify_success_rate: f64, seed: Option<u64>) -> Self {
        let rng = seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
        Self {
            rng: Mutex::new(rng),
            modify_success_rate: modify_success_rate.clamp(0.0, 1.0),
        }
    }

    fn draw(&self, probability: f64) -> bool {
        self.rng.lock().gen_bool(probability.clamp(0.0, 1.0))
    }

    async fn wire_delay(broker: &Broker) {
        tokio::time::sleep(Duration::from_millis(broker.latency_ms)).await;
    }
}

#[async_trait]
impl BrokerGateway for SimulatedBrokerGateway {
    async fn submit(
        &self,
        payload: &SubmissionPayload,
        broker: &Broker,
    ) -> Result<String, GatewayError> {
        if !broker.active {
            return Err(GatewayError::Unavailable {
                reason: format!("{} is not accepting orders", broker.name),
            });
        }
        Self::wire_delay(broker).await;
        if self.draw(broker.reliability) {
            Ok(format!(
                "{}-{}",
                broker.id.to_ascii_uppercase(),
                Uuid::new_v4().simple()
            ))
        } else {
            Err(GatewayError::Rejected {
                reason: format!("{} declined {}", broker.name, payload.client_order_id),
            })
        }
    }

    async fn cancel(&self, _order: &Order, broker: &Broker) -> bool {
        Self::wire_delay(broker).await;
        self.draw(broker.reliability)
    }

    async fn modify(&self, _order: &Order, _changes: &OrderModification, broker: &Broker) -> bool {
        Self::wire_delay(broker).await;
        self.draw(self.modify_success_rate)
    }
}

/// Deterministic broker double
#[derive(Debug)]
pub struct ScriptedBrokerGateway {
    /// Broker ID -> rejection reason
    rejecting: DashMap<String, String>,
    cancel_outcome: AtomicBool,
    modify_outcome: AtomicBool,
    submit_delay: Option<Duration>,
    sequence: AtomicU64,
    submits: AtomicUsize,
    cancels: AtomicUsize,
    modifies: AtomicUsize,
}

impl Default for ScriptedBrokerGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedBrokerGateway {
    /// Accepts everything
    #[must_use]
    pub fn new() -> Self {
        Self {
            rejecting: DashMap::new(),
            cancel_outcome: AtomicBool::new(true),
            modify_outcome: AtomicBool::new(true),
            submit_delay: None,
            sequence: AtomicU64::new(1),
            submits: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
            modifies: AtomicUsize::new(0),
        }
    }

    /// Sleep before answering submissions
    #[must_use]
    pub const fn with_submit_delay(mut self, delay: Duration) -> Self {
        self.submit_delay = Some(delay);
        self
    }

    /// Refuse every submission to `broker_id`
    pub fn reject_broker(&self, broker_id: impl Into<String>, reason: impl Into<String>) {
        self.rejecting.insert(broker_id.into(), reason.into());
    }

    /// Stop refusing submissions to `broker_id`
    pub fn accept_broker(&self, broker_id: &str) {
        self.rejecting.remove(broker_id);
    }

    /// Fix the outcome of cancel requests
    pub fn set_cancel_outcome(&self, confirmed: bool) {
        self.cancel_outcome.store(confirmed, Ordering::SeqCst);
    }

    /// Fix the outcome of modify requests
    pub fn set_modify_outcome(&self, accepted: bool) {
        self.modify_outcome.store(accepted, Ordering::SeqCst);
    }

    /// Submissions seen
    #[must_use]
    pub fn submit_count(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    /// Cancels seen
    #[must_use]
    pub fn cancel_count(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    /// Modifies seen
    #[must_use]
    pub fn modify_count(&self) -> usize {
        self.modifies.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrokerGateway for ScriptedBrokerGateway {
    async fn submit(
        &self,
        _payload: &SubmissionPayload,
        broker: &Broker,
    ) -> Result<String, GatewayError> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.submit_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = self.rejecting.get(&broker.id) {
            return Err(GatewayError::Rejected {
                reason: reason.clone(),
            });
        }
        Ok(format!(
            "SCRIPT-{}",
            self.sequence.fetch_add(1, Ordering::SeqCst)
        ))
    }

    async fn cancel(&self, _order: &Order, _broker: &Broker) -> bool {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        self.cancel_outcome.load(Ordering::SeqCst)
    }

    async fn modify(&self, _order: &Order, _changes: &OrderModification, _broker: &Broker) -> bool {
        self.modifies.fetch_add(1, Ordering::SeqCst);
        self.modify_outcome.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::order::{OrderRequest, Placement};
    use common::{InstrumentClass, Px, Side};

    fn order(broker_id: &str) -> Order {
        Order::from_request(
            OrderId(9),
            OrderRequest::limit("ACC", "AAPL", Side::Sell, 50.0, 190.0)
                .with_time_in_force(TimeInForce::Day),
            InstrumentClass::Equity,
            Placement {
                broker_id: broker_id.into(),
                venue_id: "NASDAQ".into(),
                arrival_price: Px::new(190.1),
                expires_at: None,
                algorithm: None,
            },
            Utc::now(),
        )
    }

    #[test]
    fn test_payload_uses_broker_codes() {
        let catalog = Catalog::builtin();
        let ib = catalog.broker("interactive_brokers").unwrap();
        let payload = SubmissionPayload::from_order(&order("interactive_brokers"), ib);
        assert_eq!(payload.order_type, "LMT");
        assert_eq!(payload.time_in_force, "DAY");
        assert_eq!(payload.side, "SELL");
        assert_eq!(payload.limit_price, Some(190.0));

        let alpaca = catalog.broker("alpaca").unwrap();
        let payload = SubmissionPayload::from_order(&order("alpaca"), alpaca);
        assert_eq!(payload.order_type, "limit");
        assert_eq!(payload.time_in_force, "day");
    }

    #[tokio::test]
    async fn test_scripted_rejection_maps_to_broker_rejected() {
        let catalog = Catalog::builtin();
        let broker = catalog.broker("alpaca").unwrap();
        let scripted = Arc::new(ScriptedBrokerGateway::new());
        scripted.reject_broker("alpaca", "insufficient buying power");
        let gateway = ExecutionGateway::new(scripted.clone(), Duration::from_secs(1));

        let result = gateway.submit(&order("alpaca"), broker).await;
        match result {
            Err(ExecutionError::BrokerRejected { reason, .. }) => {
                assert!(reason.contains("insufficient buying power"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(scripted.submit_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_timeout() {
        let catalog = Catalog::builtin();
        let broker = catalog.broker("alpaca").unwrap();
        let scripted =
            Arc::new(ScriptedBrokerGateway::new().with_submit_delay(Duration::from_secs(10)));
        let gateway = ExecutionGateway::new(scripted, Duration::from_secs(5));

        let result = gateway.submit(&order("alpaca"), broker).await;
        assert!(matches!(
            result,
            Err(ExecutionError::GatewayTimeout { timeout_ms: 5000, .. })
        ));
    }

    #[tokio::test]
    async fn test_cancel_without_broker_id_short_circuits() {
        let catalog = Catalog::builtin();
        let broker = catalog.broker("alpaca").unwrap();
        let scripted = Arc::new(ScriptedBrokerGateway::new());
        let gateway = ExecutionGateway::new(scripted.clone(), Duration::from_secs(1));

        assert!(!gateway.cancel(&order("alpaca"), broker).await);
        assert_eq!(scripted.cancel_count(), 0);

        let mut acked = order("alpaca");
        acked.broker_order_id = Some("SCRIPT-1".into());
        assert!(gateway.cancel(&acked, broker).await);
        assert_eq!(scripted.cancel_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_gateway_is_reproducible() {
        let catalog = Catalog::builtin();
        let broker = catalog.broker("alpaca").unwrap();
        let payload = SubmissionPayload::from_order(&order("alpaca"), broker);

        let mut outcomes = Vec::new();
        for _ in 0..2 {
            let sim = SimulatedBrokerGateway::new(0.9, Some(42));
            let mut run = Vec::new();
            for _ in 0..20 {
                run.push(sim.submit(&payload, broker).await.is_ok());
            }
            outcomes.push(run);
        }
        assert_eq!(outcomes[0], outcomes[1]);
    }

    #[tokio::test]
    async fn test_simulated_gateway_refuses_inactive_broker() {
        let catalog = Catalog::builtin();
        let mut broker = catalog.broker("alpaca").unwrap().clone();
        broker.active = false;
        let sim = SimulatedBrokerGateway::new(1.0, Some(7));
        let payload = SubmissionPayload::from_order(&order("alpaca"), &broker);
        assert!(matches!(
            sim.submit(&payload, &broker).await,
            Err(GatewayError::Unavailable { .. })
        ));

        let gateway = ExecutionGateway::new(Arc::new(sim), Duration::from_secs(1));
        match gateway.submit(&order("alpaca"), &broker).await {
            Err(ExecutionError::BrokerRejected { reason, .. }) => {
                assert!(reason.starts_with("unavailable"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
