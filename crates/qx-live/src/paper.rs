use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use qx_types::market::Symbol;
use qx_types::orders::{Fill, Order, OrderId, OrderStatus, OrderType, Side};
use qx_types::portfolio::{Account, Position};

use crate::broker::{Broker, BrokerResult, Quote};
use crate::errors::BrokerError;

/// Configuration for the simulated paper broker. `slippage_bps` applies a
/// price impact proportional to the traded price; `market_impact_coefficient`
/// scales a second, logarithmic-in-quantity impact term, matching spec.md
/// §4.2's execution model (larger orders move the fill price further, but
/// with diminishing marginal effect).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaperBrokerConfig {
    pub initial_cash: Decimal,
    pub commission: Decimal,
    pub slippage_bps: Decimal,
    pub market_impact_coefficient: Decimal,
}

impl Default for PaperBrokerConfig {
    fn default() -> Self {
        Self {
            initial_cash: Decimal::from(100_000),
            commission: Decimal::new(1, 3),   // 0.1% of notional
            slippage_bps: Decimal::new(5, 0), // 5 bps
            market_impact_coefficient: Decimal::new(1, 4),
        }
    }
}

struct PaperState {
    connected: bool,
    cash: Decimal,
    positions: HashMap<String, Position>,
    orders: HashMap<OrderId, Order>,
    fills: Vec<Fill>,
    latest_prices: HashMap<String, Decimal>,
}

/// A simulated, in-process broker used for dry runs and tests. Orders fill
/// immediately against the latest known price, adjusted for slippage and
/// market impact; limit orders only fill once the market trades through
/// their limit.
pub struct PaperBroker {
    config: PaperBrokerConfig,
    state: Mutex<PaperState>,
    connected_flag: AtomicBool,
}

impl PaperBroker {
    pub fn new(config: PaperBrokerConfig) -> Self {
        let cash = config.initial_cash;
        Self {
            config,
            state: Mutex::new(PaperState {
                connected: false,
                cash,
                positions: HashMap::new(),
                orders: HashMap::new(),
                fills: Vec::new(),
                latest_prices: HashMap::new(),
            }),
            connected_flag: AtomicBool::new(false),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(PaperBrokerConfig::default())
    }

    /// Feed the broker a fresh mark for `symbol`, attempting to fill any
    /// resting orders that now cross.
    pub fn update_price(&self, symbol: &Symbol, price: Decimal) {
        let mut state = self.state.lock();
        state.latest_prices.insert(symbol.to_string(), price);
        let pending: Vec<OrderId> = state
            .orders
            .iter()
            .filter(|(_, o)| o.is_active() && o.symbol == *symbol)
            .map(|(id, _)| id.clone())
            .collect();
        for id in pending {
            self.try_fill(&mut state, &id);
        }
    }

    pub fn fills(&self) -> Vec<Fill> {
        self.state.lock().fills.clone()
    }

    /// Price impact applied to a simulated fill: linear slippage plus a
    /// logarithmic-in-quantity market-impact term, signed by trade direction.
    fn impact_adjusted_price(&self, base_price: Decimal, side: Side, quantity: Decimal) -> Decimal {
        let qty_f = quantity.to_f64().unwrap_or(0.0).max(0.0);
        let impact_term = self.config.market_impact_coefficient * Decimal::try_from((1.0 + qty_f).ln()).unwrap_or(Decimal::ZERO);
        let slippage_fraction = self.config.slippage_bps / Decimal::from(10_000) + impact_term;
        let direction = match side {
            Side::Buy => Decimal::ONE,
            Side::Sell => -Decimal::ONE,
        };
        base_price * (Decimal::ONE + direction * slippage_fraction)
    }

    fn try_fill(&self, state: &mut PaperState, order_id: &OrderId) {
        let Some(order) = state.orders.get(order_id).cloned() else {
            return;
        };
        if !order.is_active() {
            return;
        }
        let Some(&mark) = state.latest_prices.get(&order.symbol.to_string()) else {
            return;
        };

        let crosses = match order.order_type {
            OrderType::Market => true,
            OrderType::Limit { price } => match order.side {
                Side::Buy => mark <= price,
                Side::Sell => mark >= price,
            },
            OrderType::Stop { stop_price } => match order.side {
                Side::Buy => mark >= stop_price,
                Side::Sell => mark <= stop_price,
            },
            OrderType::StopLimit { stop_price, limit_price } => {
                let triggered = match order.side {
                    Side::Buy => mark >= stop_price,
                    Side::Sell => mark <= stop_price,
                };
                triggered
                    && match order.side {
                        Side::Buy => mark <= limit_price,
                        Side::Sell => mark >= limit_price,
                    }
            }
        };
        if !crosses {
            return;
        }

        let remaining = order.remaining_quantity();
        let fill_price = self.impact_adjusted_price(mark, order.side, remaining);
        let commission = fill_price * remaining * self.config.commission;

        let required_cash = match order.side {
            Side::Buy => fill_price * remaining + commission,
            Side::Sell => Decimal::ZERO,
        };
        if order.side == Side::Buy && required_cash > state.cash {
            let mut rejected = order.clone();
            rejected.reject();
            state.orders.insert(order_id.clone(), rejected);
            warn!(order_id = %order_id, "paper broker rejected order: insufficient funds");
            return;
        }

        let fill = Fill::new(
            order_id.clone(),
            order.symbol.clone(),
            order.side,
            remaining,
            fill_price,
            commission,
            order.strategy_id.clone(),
        );

        let mut updated = order.clone();
        updated.apply_fill(remaining, fill_price, Utc::now());
        state.orders.insert(order_id.clone(), updated);

        let position = state
            .positions
            .entry(order.symbol.to_string())
            .or_insert_with(|| Position::new(order.symbol.clone()));
        position.apply_fill(&fill);

        state.cash += fill.net_cash_impact();
        state.fills.push(fill);
        debug!(order_id = %order_id, price = %fill_price, qty = %remaining, "paper fill");
    }
}

#[async_trait]
impl Broker for PaperBroker {
    async fn connect(&self) -> BrokerResult<()> {
        self.state.lock().connected = true;
        self.connected_flag.store(true, Ordering::SeqCst);
        info!("paper broker connected");
        Ok(())
    }

    async fn disconnect(&self) -> BrokerResult<()> {
        self.state.lock().connected = false;
        self.connected_flag.store(false, Ordering::SeqCst);
        info!("paper broker disconnected");
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected_flag.load(Ordering::SeqCst)
    }

    async fn place_order(&self, mut order: Order) -> BrokerResult<Order> {
        if !self.is_connected().await {
            return Err(BrokerError::NotConnected);
        }
        order.status = OrderStatus::Submitted;
        order.submitted_at = Some(Utc::now());
        let id = order.id.clone();
        let mut state = self.state.lock();
        state.orders.insert(id.clone(), order);
        self.try_fill(&mut state, &id);
        Ok(state.orders.get(&id).cloned().expect("just inserted"))
    }

    async fn cancel_order(&self, order_id: &OrderId) -> BrokerResult<()> {
        let mut state = self.state.lock();
        let order = state
            .orders
            .get_mut(order_id)
            .ok_or_else(|| BrokerError::OrderNotFound { order_id: order_id.clone() })?;
        order.cancel();
        Ok(())
    }

    async fn get_order(&self, order_id: &OrderId) -> BrokerResult<Order> {
        self.state
            .lock()
            .orders
            .get(order_id)
            .cloned()
            .ok_or_else(|| BrokerError::OrderNotFound { order_id: order_id.clone() })
    }

    async fn get_open_orders(&self) -> BrokerResult<Vec<Order>> {
        Ok(self
            .state
            .lock()
            .orders
            .values()
            .filter(|o| o.is_active())
            .cloned()
            .collect())
    }

    async fn get_positions(&self) -> BrokerResult<Vec<Position>> {
        Ok(self.state.lock().positions.values().cloned().collect())
    }

    async fn get_position(&self, symbol: &Symbol) -> BrokerResult<Option<Position>> {
        Ok(self.state.lock().positions.get(&symbol.to_string()).cloned())
    }

    async fn get_account(&self) -> BrokerResult<Account> {
        let state = self.state.lock();
        let positions_value: Decimal = state.positions.values().map(|p| p.market_value).sum();
        let unrealized: Decimal = state.positions.values().map(|p| p.unrealized_pnl).sum();
        let realized: Decimal = state.positions.values().map(|p| p.realized_pnl).sum();
        Ok(Account {
            account_id: "paper".to_string(),
            initial_capital: self.config.initial_cash,
            cash: state.cash,
            positions_value,
            buying_power: state.cash,
            unrealized_pnl: unrealized,
            realized_pnl: realized,
        })
    }

    async fn get_quote(&self, symbol: &Symbol) -> BrokerResult<Quote> {
        let state = self.state.lock();
        let last = *state
            .latest_prices
            .get(&symbol.to_string())
            .ok_or_else(|| BrokerError::Transport { cause: format!("no price for {symbol}") })?;
        Ok(Quote {
            symbol: symbol.clone(),
            bid: last,
            ask: last,
            last,
            timestamp: Utc::now(),
        })
    }

    async fn validate_order(&self, order: &Order) -> BrokerResult<()> {
        if order.quantity <= Decimal::ZERO {
            return Err(BrokerError::Rejected {
                reason: "quantity must be positive".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sym() -> Symbol {
        Symbol::equity("AAPL")
    }

    #[tokio::test]
    async fn market_order_fills_immediately_at_known_price() {
        let broker = PaperBroker::with_defaults();
        broker.connect().await.unwrap();
        broker.update_price(&sym(), dec!(100));

        let order = Order::market(sym(), Side::Buy, dec!(10), "s");
        let placed = broker.place_order(order).await.unwrap();
        assert_eq!(placed.status, OrderStatus::Filled);
        assert!(placed.average_fill_price.unwrap() > dec!(100));
    }

    #[tokio::test]
    async fn limit_order_waits_until_price_crosses() {
        let broker = PaperBroker::with_defaults();
        broker.connect().await.unwrap();
        broker.update_price(&sym(), dec!(100));

        let order = Order::limit(sym(), Side::Buy, dec!(10), dec!(90), "s");
        let placed = broker.place_order(order).await.unwrap();
        assert_eq!(placed.status, OrderStatus::Submitted);

        broker.update_price(&sym(), dec!(85));
        let updated = broker.get_order(&placed.id).await.unwrap();
        assert_eq!(updated.status, OrderStatus::Filled);
    }

    #[tokio::test]
    async fn insufficient_funds_rejects_order() {
        let broker = PaperBroker::new(PaperBrokerConfig {
            initial_cash: dec!(100),
            ..PaperBrokerConfig::default()
        });
        broker.connect().await.unwrap();
        broker.update_price(&sym(), dec!(100));

        let order = Order::market(sym(), Side::Buy, dec!(10), "s");
        let placed = broker.place_order(order).await.unwrap();
        assert_eq!(placed.status, OrderStatus::Rejected);
    }

    #[tokio::test]
    async fn disconnected_broker_refuses_orders() {
        let broker = PaperBroker::with_defaults();
        let order = Order::market(sym(), Side::Buy, dec!(10), "s");
        let err = broker.place_order(order).await.unwrap_err();
        assert!(matches!(err, BrokerError::NotConnected));
    }
}
