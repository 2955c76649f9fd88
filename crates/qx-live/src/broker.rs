use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use qx_types::market::Symbol;
use qx_types::orders::{Order, OrderId};
use qx_types::portfolio::{Account, Position};

use crate::errors::BrokerError;

pub type BrokerResult<T> = Result<T, BrokerError>;

/// A venue quote, as returned by [`Broker::get_quote`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: Symbol,
    pub bid: Decimal,
    pub ask: Decimal,
    pub last: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// The broker adapter contract (C2). Method names mirror spec.md §4.2
/// exactly, distinct from the teacher's `submit_order`/`get_order_status`
/// naming.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn connect(&self) -> BrokerResult<()>;
    async fn disconnect(&self) -> BrokerResult<()>;
    async fn is_connected(&self) -> bool;

    async fn place_order(&self, order: Order) -> BrokerResult<Order>;
    async fn cancel_order(&self, order_id: &OrderId) -> BrokerResult<()>;
    async fn get_order(&self, order_id: &OrderId) -> BrokerResult<Order>;
    async fn get_open_orders(&self) -> BrokerResult<Vec<Order>>;

    async fn get_positions(&self) -> BrokerResult<Vec<Position>>;
    async fn get_position(&self, symbol: &Symbol) -> BrokerResult<Option<Position>>;
    async fn get_account(&self) -> BrokerResult<Account>;

    async fn get_quote(&self, symbol: &Symbol) -> BrokerResult<Quote>;

    /// Venue-side pre-trade validation, distinct from the Order Validator
    /// (C4) which runs purely local checks before an order ever reaches here.
    async fn validate_order(&self, order: &Order) -> BrokerResult<()>;
}

/// Fill/status push notifications a broker adapter delivers asynchronously,
/// mirrored from the teacher's `BrokerCallback` trait.
#[async_trait]
pub trait BrokerCallback: Send + Sync {
    async fn on_fill(&self, order_id: &OrderId, fill_price: Decimal, fill_quantity: Decimal);
    async fn on_order_update(&self, order: &Order);
    async fn on_connection_status(&self, connected: bool);
}

type BrokerConstructor = dyn Fn(&toml::Value) -> BrokerResult<Arc<dyn Broker>> + Send + Sync;

/// The Broker Factory (C2): registers named broker constructors and builds
/// them by name at configuration time, so the engine never needs to
/// `match` on a broker name directly (spec.md §4.2).
pub struct BrokerFactory {
    constructors: DashMap<String, Arc<BrokerConstructor>>,
}

impl BrokerFactory {
    pub fn new() -> Self {
        Self {
            constructors: DashMap::new(),
        }
    }

    /// Register a named constructor. Replaces any prior registration under
    /// the same name.
    pub fn register(&self, name: impl Into<String>, ctor: impl Fn(&toml::Value) -> BrokerResult<Arc<dyn Broker>> + Send + Sync + 'static) {
        let name = name.into();
        info!(broker = %name, "registered broker constructor");
        self.constructors.insert(name, Arc::new(ctor));
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Build a broker instance by name, handing the raw TOML config table to
    /// its constructor to parse as it sees fit.
    pub fn build(&self, name: &str, config: &toml::Value) -> BrokerResult<Arc<dyn Broker>> {
        let ctor = self
            .constructors
            .get(name)
            .ok_or_else(|| BrokerError::UnknownBroker { name: name.to_string() })?;
        ctor(config)
    }
}

impl Default for BrokerFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paper::{PaperBroker, PaperBrokerConfig};
    use serde::Deserialize;

    #[test]
    fn builds_a_registered_broker_by_name() {
        let factory = BrokerFactory::new();
        factory.register("paper", |config| {
            let parsed = PaperBrokerConfig::deserialize(config.clone())
                .map_err(|err: toml::de::Error| BrokerError::InvalidConfiguration { reason: err.to_string() })?;
            Ok(Arc::new(PaperBroker::new(parsed)))
        });

        assert!(factory.is_registered("paper"));
        let broker = factory.build("paper", &toml::Value::Table(Default::default()));
        assert!(broker.is_ok());
    }

    #[test]
    fn unknown_broker_name_errors() {
        let factory = BrokerFactory::new();
        let err = factory.build("ibkr", &toml::Value::Table(Default::default())).unwrap_err();
        assert!(matches!(err, BrokerError::UnknownBroker { .. }));
    }
}
