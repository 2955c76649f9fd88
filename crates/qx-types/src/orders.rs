use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::market::Symbol;

/// Order identity. Client-assigned by default; a broker may replace it with
/// its own assigned identity on acceptance (spec.md §4.2 `place_order`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(pub String);

impl OrderId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for OrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for OrderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for OrderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Direction of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn sign(&self) -> i32 {
        match self {
            Side::Buy => 1,
            Side::Sell => -1,
        }
    }
}

/// Order type. Limit/Stop/StopLimit variants carry their required prices so
/// the invariant "type=Limit ⇒ price is set" is enforced by construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit { price: Decimal },
    Stop { stop_price: Decimal },
    StopLimit { stop_price: Decimal, limit_price: Decimal },
}

impl OrderType {
    pub fn limit_price(&self) -> Option<Decimal> {
        match self {
            OrderType::Limit { price } => Some(*price),
            OrderType::StopLimit { limit_price, .. } => Some(*limit_price),
            _ => None,
        }
    }

    pub fn stop_price(&self) -> Option<Decimal> {
        match self {
            OrderType::Stop { stop_price } | OrderType::StopLimit { stop_price, .. } => {
                Some(*stop_price)
            }
            _ => None,
        }
    }
}

/// Order lifecycle state, exactly the graph in spec.md §4.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Created,
    Pending,
    Submitted,
    PartiallyFilled,
    Filled,
    Rejected,
    Cancelled,
    Expired,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Rejected | OrderStatus::Cancelled | OrderStatus::Expired
        )
    }

    pub fn is_open(&self) -> bool {
        matches!(
            self,
            OrderStatus::Pending | OrderStatus::Submitted | OrderStatus::PartiallyFilled
        )
    }
}

/// A trading order. See spec.md §3 for field-level invariants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub symbol: Symbol,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub status: OrderStatus,
    pub filled_quantity: Decimal,
    pub average_fill_price: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub filled_at: Option<DateTime<Utc>>,
    pub strategy_id: String,
    pub metadata: serde_json::Value,
}

impl Order {
    pub fn new(symbol: Symbol, side: Side, quantity: Decimal, order_type: OrderType, strategy_id: impl Into<String>) -> Self {
        Self {
            id: OrderId::new(),
            symbol,
            side,
            order_type,
            quantity,
            status: OrderStatus::Created,
            filled_quantity: Decimal::ZERO,
            average_fill_price: None,
            created_at: Utc::now(),
            submitted_at: None,
            filled_at: None,
            strategy_id: strategy_id.into(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn market(symbol: Symbol, side: Side, quantity: Decimal, strategy_id: impl Into<String>) -> Self {
        Self::new(symbol, side, quantity, OrderType::Market, strategy_id)
    }

    pub fn limit(symbol: Symbol, side: Side, quantity: Decimal, price: Decimal, strategy_id: impl Into<String>) -> Self {
        Self::new(symbol, side, quantity, OrderType::Limit { price }, strategy_id)
    }

    pub fn remaining_quantity(&self) -> Decimal {
        self.quantity - self.filled_quantity
    }

    pub fn is_active(&self) -> bool {
        self.status.is_open()
    }

    /// Advance `filled_quantity` and recompute the VWAP fill price per the
    /// formula in spec.md §4.6:
    /// `new_vwap = (old_vwap * (filled - qty) + price * qty) / filled`.
    pub fn apply_fill(&mut self, fill_quantity: Decimal, fill_price: Decimal, at: DateTime<Utc>) {
        let previously_filled = self.filled_quantity;
        let total_filled = previously_filled + fill_quantity;

        self.average_fill_price = Some(match self.average_fill_price {
            Some(old_vwap) if total_filled > Decimal::ZERO => {
                (old_vwap * previously_filled + fill_price * fill_quantity) / total_filled
            }
            _ => fill_price,
        });

        self.filled_quantity = total_filled;

        if self.filled_quantity >= self.quantity {
            self.status = OrderStatus::Filled;
            self.filled_at = Some(at);
        } else {
            self.status = OrderStatus::PartiallyFilled;
        }
    }

    pub fn reject(&mut self) {
        self.status = OrderStatus::Rejected;
    }

    pub fn cancel(&mut self) {
        if self.is_active() {
            self.status = OrderStatus::Cancelled;
        }
    }

    pub fn expire(&mut self) {
        if self.is_active() {
            self.status = OrderStatus::Expired;
        }
    }
}

/// A single execution against an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub id: Uuid,
    pub order_id: OrderId,
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: Decimal,
    pub price: Decimal,
    pub commission: Decimal,
    pub timestamp: DateTime<Utc>,
    pub strategy_id: String,
}

impl Fill {
    pub fn new(
        order_id: OrderId,
        symbol: Symbol,
        side: Side,
        quantity: Decimal,
        price: Decimal,
        commission: Decimal,
        strategy_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            symbol,
            side,
            quantity,
            price,
            commission,
            timestamp: Utc::now(),
            strategy_id: strategy_id.into(),
        }
    }

    pub fn gross_amount(&self) -> Decimal {
        self.quantity * self.price
    }

    pub fn net_cash_impact(&self) -> Decimal {
        match self.side {
            Side::Buy => -(self.gross_amount() + self.commission),
            Side::Sell => self.gross_amount() - self.commission,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sym() -> Symbol {
        Symbol::equity("AAPL")
    }

    #[test]
    fn new_order_starts_created() {
        let o = Order::market(sym(), Side::Buy, dec!(10), "s");
        assert_eq!(o.status, OrderStatus::Created);
        assert_eq!(o.filled_quantity, Decimal::ZERO);
    }

    #[test]
    fn vwap_after_two_partial_fills() {
        let mut o = Order::market(sym(), Side::Buy, dec!(100), "s");
        o.apply_fill(dec!(40), dec!(150), Utc::now());
        assert_eq!(o.status, OrderStatus::PartiallyFilled);
        assert_eq!(o.average_fill_price, Some(dec!(150)));

        o.apply_fill(dec!(60), dec!(160), Utc::now());
        assert_eq!(o.status, OrderStatus::Filled);
        // (150*40 + 160*60) / 100 = 156
        assert_eq!(o.average_fill_price, Some(dec!(156)));
        assert_eq!(o.filled_quantity, dec!(100));
    }

    #[test]
    fn filled_iff_quantity_matches() {
        let mut o = Order::market(sym(), Side::Buy, dec!(10), "s");
        o.apply_fill(dec!(10), dec!(100), Utc::now());
        assert_eq!(o.status, OrderStatus::Filled);
        assert_eq!(o.filled_quantity, o.quantity);
    }

    #[test]
    fn cancel_only_affects_active_orders() {
        let mut o = Order::market(sym(), Side::Buy, dec!(10), "s");
        o.apply_fill(dec!(10), dec!(100), Utc::now());
        o.cancel();
        assert_eq!(o.status, OrderStatus::Filled, "terminal orders cannot be cancelled");
    }
}
