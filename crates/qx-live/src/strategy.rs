use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;

use qx_types::market::MarketEvent;
use qx_types::orders::Fill;

use crate::event_bus::EventBus;

/// External strategy interface (spec.md §6). Intentionally distinct from the
/// teacher's `Strategy` trait: strategy/indicator logic itself is out of
/// scope here, so this interface exists only as the seam the execution
/// engine drives — concrete implementations belong outside this crate.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Called once at startup so the strategy can subscribe to the event
    /// kinds it cares about.
    fn set_event_bus(&mut self, bus: Arc<EventBus>);

    async fn on_start(&mut self);
    async fn on_stop(&mut self);

    async fn on_data(&mut self, event: &MarketEvent);
    async fn on_fill(&mut self, fill: &Fill);

    /// Signed quantity per symbol this strategy currently believes it holds.
    fn positions(&self) -> HashMap<String, Decimal>;
}

/// A strategy that does nothing, used to exercise the engine's lifecycle and
/// event wiring in tests without depending on any real trading logic.
pub struct NoopStrategy {
    positions: HashMap<String, Decimal>,
    started: bool,
}

impl NoopStrategy {
    pub fn new() -> Self {
        Self {
            positions: HashMap::new(),
            started: false,
        }
    }

    pub fn is_started(&self) -> bool {
        self.started
    }
}

impl Default for NoopStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Strategy for NoopStrategy {
    fn set_event_bus(&mut self, _bus: Arc<EventBus>) {}

    async fn on_start(&mut self) {
        self.started = true;
    }

    async fn on_stop(&mut self) {
        self.started = false;
    }

    async fn on_data(&mut self, _event: &MarketEvent) {}

    async fn on_fill(&mut self, fill: &Fill) {
        let key = fill.symbol.to_string();
        let delta = match fill.side {
            qx_types::orders::Side::Buy => fill.quantity,
            qx_types::orders::Side::Sell => -fill.quantity,
        };
        *self.positions.entry(key).or_insert(Decimal::ZERO) += delta;
    }

    fn positions(&self) -> HashMap<String, Decimal> {
        self.positions.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qx_types::market::Symbol;
    use qx_types::orders::OrderId;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn noop_strategy_tracks_fills() {
        let mut strategy = NoopStrategy::new();
        strategy.on_start().await;
        assert!(strategy.is_started());

        let fill = Fill::new(OrderId::new(), Symbol::equity("AAPL"), qx_types::orders::Side::Buy, dec!(10), dec!(100), Decimal::ZERO, "s");
        strategy.on_fill(&fill).await;
        assert_eq!(strategy.positions().get("NASDAQ:AAPL"), Some(&dec!(10)));
    }
}
