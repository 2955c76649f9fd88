use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use qx_types::market::Symbol;
use qx_types::orders::{Order, OrderId};
use qx_types::portfolio::{Account, Position};

use crate::broker::{Broker, BrokerResult, Quote};

/// Wraps any [`Broker`] with a minimum spacing between outbound requests,
/// the shape every real venue API in this domain requires. Generic over the
/// inner broker so it composes with `PaperBroker` in tests or a real venue
/// adapter in production without duplicating rate-limit bookkeeping.
pub struct RateLimitedBroker<B: Broker> {
    inner: B,
    min_request_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl<B: Broker> RateLimitedBroker<B> {
    pub fn new(inner: B, min_request_interval: Duration) -> Self {
        Self {
            inner,
            min_request_interval,
            last_request: Mutex::new(None),
        }
    }

    async fn throttle(&self) {
        let wait = {
            let mut last = self.last_request.lock();
            let now = Instant::now();
            let wait = last
                .map(|t| self.min_request_interval.saturating_sub(now.saturating_duration_since(t)))
                .unwrap_or(Duration::ZERO);
            *last = Some(now + wait);
            wait
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}

#[async_trait]
impl<B: Broker> Broker for RateLimitedBroker<B> {
    async fn connect(&self) -> BrokerResult<()> {
        self.throttle().await;
        self.inner.connect().await
    }

    async fn disconnect(&self) -> BrokerResult<()> {
        self.throttle().await;
        self.inner.disconnect().await
    }

    async fn is_connected(&self) -> bool {
        self.inner.is_connected().await
    }

    async fn place_order(&self, order: Order) -> BrokerResult<Order> {
        self.throttle().await;
        self.inner.place_order(order).await
    }

    async fn cancel_order(&self, order_id: &OrderId) -> BrokerResult<()> {
        self.throttle().await;
        self.inner.cancel_order(order_id).await
    }

    async fn get_order(&self, order_id: &OrderId) -> BrokerResult<Order> {
        self.throttle().await;
        self.inner.get_order(order_id).await
    }

    async fn get_open_orders(&self) -> BrokerResult<Vec<Order>> {
        self.throttle().await;
        self.inner.get_open_orders().await
    }

    async fn get_positions(&self) -> BrokerResult<Vec<Position>> {
        self.throttle().await;
        self.inner.get_positions().await
    }

    async fn get_position(&self, symbol: &Symbol) -> BrokerResult<Option<Position>> {
        self.throttle().await;
        self.inner.get_position(symbol).await
    }

    async fn get_account(&self) -> BrokerResult<Account> {
        self.throttle().await;
        self.inner.get_account().await
    }

    async fn get_quote(&self, symbol: &Symbol) -> BrokerResult<Quote> {
        self.throttle().await;
        self.inner.get_quote(symbol).await
    }

    async fn validate_order(&self, order: &Order) -> BrokerResult<()> {
        self.inner.validate_order(order).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paper::PaperBroker;
    use std::time::Instant as StdInstant;

    #[tokio::test]
    async fn enforces_minimum_spacing_between_requests() {
        let broker = RateLimitedBroker::new(PaperBroker::with_defaults(), Duration::from_millis(50));
        broker.connect().await.unwrap();

        let start = StdInstant::now();
        broker.is_connected().await;
        let _ = broker.get_positions().await;
        let _ = broker.get_positions().await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
