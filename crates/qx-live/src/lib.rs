pub mod broker;
pub mod config;
pub mod engine;
pub mod errors;
pub mod event_bus;
pub mod market_stream;
pub mod order_manager;
pub mod paper;
pub mod pnl;
pub mod position_sync;
pub mod rate_limited;
pub mod state_store;
pub mod strategy;
pub mod telemetry;
pub mod validator;

pub use broker::{Broker, BrokerCallback, BrokerFactory, BrokerResult, Quote};
pub use config::EngineSettings;
pub use engine::{EngineEvent, EngineState, ExecutionEngine};
pub use errors::{BrokerError, EngineError, LiveError, LiveResult, MarketDataError, StateStoreError};
pub use event_bus::{EventBus, EventBusStats};
pub use market_stream::{MarketDataStream, StreamDiagnostics, TickSource};
pub use order_manager::{OrderManager, OrderManagerError, OrderManagerEvent, OrderManagerStatistics};
pub use paper::{PaperBroker, PaperBrokerConfig};
pub use pnl::{PerformanceSummary, PnlSnapshot, PnlTracker};
pub use position_sync::{DiscrepancyType, PositionDiscrepancy, PositionSynchronizer, ReconciliationReport};
pub use rate_limited::RateLimitedBroker;
pub use state_store::StateStore;
pub use strategy::{NoopStrategy, Strategy};
pub use validator::{OrderValidator, ValidationFailure};
