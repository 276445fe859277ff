//! Order Execution Engine
//!
//! Order lifecycle management and smart order routing:
//! - Validate and register orders, submit them through a broker gateway
//! - Rank broker/venue pairs by fill probability, latency and cost
//! - Apply partial fills with running VWAP, commission and slippage
//! - Expire and evict orders in the background
//! - Report execution quality against arrival, VWAP and TWAP benchmarks

pub mod algorithms;
pub mod analytics;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod gateway;
pub mod lifecycle;
pub mod market;
pub mod order;
pub mod registry;
pub mod router;
pub mod simulator;

pub use analytics::{ExecutionReport, ExecutionStatistics};
pub use catalog::{Broker, Catalog, CatalogStore, ExecutionAlgorithm, Venue};
pub use config::{EngineConfig, FillModelConfig};
pub use engine::{EngineHealth, ExecutionEngine, HealthStatus, MetricsSnapshot, PassSummary};
pub use error::{ErrorKind, ExecutionError, ExecutionResult, GatewayError};
pub use events::OrderEvent;
pub use gateway::{BrokerGateway, ScriptedBrokerGateway, SimulatedBrokerGateway};
pub use market::{OrderBookSnapshot, QuoteSource, SyntheticQuotes};
pub use order::{
    FillDraft, LiquidityFlag, Order, OrderFill, OrderFilter, OrderId, OrderModification,
    OrderRequest, OrderStatus, OrderType, ProtectiveLevels, TimeInForce,
};
pub use router::{CandidateRoute, RouteProposal, SmartRouter};
pub use simulator::{FillModel, RandomFillModel, Reconciler, ScriptedFills};
