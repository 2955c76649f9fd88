use thiserror::Error;

use qx_types::orders::OrderId;

/// Errors from a broker adapter (C2).
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("not connected to broker")]
    NotConnected,

    #[error("order rejected by broker: {reason}")]
    Rejected { reason: String },

    #[error("order {order_id} not found")]
    OrderNotFound { order_id: OrderId },

    #[error("transport error: {cause}")]
    Transport { cause: String },

    #[error("authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("no broker registered under the name \"{name}\"")]
    UnknownBroker { name: String },

    #[error("invalid broker configuration: {reason}")]
    InvalidConfiguration { reason: String },
}

/// Errors from the market data stream (C3).
#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("not connected to market data feed")]
    NotConnected,

    #[error("subscription failed for {symbol}: {reason}")]
    SubscriptionFailed { symbol: String, reason: String },

    #[error("exceeded {attempts} reconnect attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("transport error: {cause}")]
    Transport { cause: String },
}

/// Errors from the execution engine (C9) and its lifecycle.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine is not running")]
    NotRunning,

    #[error("engine is already running")]
    AlreadyRunning,

    #[error("order validation failed: {reason}")]
    ValidationFailure { reason: String },

    #[error("risk supervisor rejected order: {reason}")]
    RiskViolation { reason: String },

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    MarketData(#[from] MarketDataError),

    #[error(transparent)]
    StateStore(#[from] StateStoreError),

    #[error("recovery failed: {reason}")]
    Recovery { reason: String },

    #[error("fatal engine error: {reason}")]
    Fatal { reason: String },
}

/// Errors from the state store (C10).
#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("no saved state found")]
    NoState,
}

impl From<rusqlite::Error> for StateStoreError {
    fn from(err: rusqlite::Error) -> Self {
        StateStoreError::Database(err.to_string())
    }
}

/// Top-level error composing every subsystem error, mirroring the teacher's
/// single-enum-per-crate convention.
#[derive(Debug, Error)]
pub enum LiveError {
    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    MarketData(#[from] MarketDataError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    StateStore(#[from] StateStoreError),

    #[error(transparent)]
    Event(#[from] qx_types::errors::EventError),

    #[error(transparent)]
    OrderBuild(#[from] qx_types::errors::OrderBuildError),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type LiveResult<T> = Result<T, LiveError>;
