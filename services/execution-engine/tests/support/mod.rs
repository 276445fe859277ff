//! Shared fixtures for the execution engine integration tests

#![allow(dead_code)]

use common::{Px, Qty, Side, Symbol};
use execution_engine::{
    Catalog, EngineConfig, ExecutionEngine, FillDraft, Order, OrderRequest, ScriptedBrokerGateway,
    ScriptedFills, SyntheticQuotes,
};
use rstest::fixture;
use std::sync::{Arc, Once};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Initialize logging for tests
pub fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "execution_engine=debug,warn".into()),
            )
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .init();
    });
}

/// Engine wired to deterministic doubles
pub struct TestHarness {
    pub engine: Arc<ExecutionEngine>,
    pub gateway: Arc<ScriptedBrokerGateway>,
    pub fills: Arc<ScriptedFills>,
    pub quotes: Arc<SyntheticQuotes>,
}

impl TestHarness {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_gateway(config, ScriptedBrokerGateway::new())
    }

    pub fn with_gateway(config: EngineConfig, gateway: ScriptedBrokerGateway) -> Self {
        init_test_logging();
        let gateway = Arc::new(gateway);
        let fills = Arc::new(ScriptedFills::new());
        let quotes = Arc::new(SyntheticQuotes::new());
        quotes.set_price(&Symbol::new("AAPL"), Px::new(100.0));
        quotes.set_price(&Symbol::new("MSFT"), Px::new(400.0));

        let engine = ExecutionEngine::new(config, Catalog::builtin(), gateway.clone())
            .expect("test config is valid")
            .with_fill_model(fills.clone())
            .with_quote_source(quotes.clone());
        Self {
            engine: Arc::new(engine),
            gateway,
            fills,
            quotes,
        }
    }

    /// Create an order that must be accepted
    pub async fn submit(&self, request: OrderRequest) -> Order {
        self.engine
            .create_order(request)
            .await
            .expect("order should be accepted")
    }

    /// Queue fills and drain them through fill passes
    pub fn fill(&self, order: &Order, fills: &[(f64, f64)]) {
        for &(quantity, price) in fills {
            self.fills
                .push(order.id, FillDraft::new(Qty::new(quantity), Px::new(price)));
        }
        for _ in fills {
            self.engine.run_fill_pass();
        }
    }
}

/// Default engine configuration with a fixed seed
pub fn test_config() -> EngineConfig {
    EngineConfig {
        seed: Some(42),
        ..EngineConfig::default()
    }
}

#[fixture]
pub fn harness() -> TestHarness {
    TestHarness::new(test_config())
}

pub fn market_buy(symbol: &str, quantity: f64) -> OrderRequest {
    OrderRequest::market("ACC-1", symbol, Side::Buy, quantity)
}

/// Compare floats with a tolerance
pub fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}
