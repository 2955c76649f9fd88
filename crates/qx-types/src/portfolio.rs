use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::market::Symbol;
use crate::orders::{Fill, Side};

/// A held position. Invariant: when `quantity` is zero, `mark` and
/// `unrealized_pnl` must also be zero (`realized_pnl` may remain non-zero).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    pub quantity: Decimal,
    pub average_price: Decimal,
    pub mark: Decimal,
    pub market_value: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub last_updated: DateTime<Utc>,
}

impl Position {
    pub fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            quantity: Decimal::ZERO,
            average_price: Decimal::ZERO,
            mark: Decimal::ZERO,
            market_value: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            last_updated: Utc::now(),
        }
    }

    pub fn is_long(&self) -> bool {
        self.quantity > Decimal::ZERO
    }

    pub fn is_short(&self) -> bool {
        self.quantity < Decimal::ZERO
    }

    pub fn is_flat(&self) -> bool {
        self.quantity == Decimal::ZERO
    }

    /// Apply a fill: extends, reduces, flips, or opens the position, realizing
    /// P&L on any quantity that crosses zero or closes out.
    pub fn apply_fill(&mut self, fill: &Fill) {
        let delta = match fill.side {
            Side::Buy => fill.quantity,
            Side::Sell => -fill.quantity,
        };
        let new_quantity = self.quantity + delta;

        if self.quantity == Decimal::ZERO {
            self.quantity = new_quantity;
            self.average_price = fill.price;
        } else if self.quantity.signum() == delta.signum() {
            // Adding to an existing position: blend cost basis.
            let total_cost = self.quantity.abs() * self.average_price + delta.abs() * fill.price;
            let total_quantity = self.quantity.abs() + delta.abs();
            self.average_price = total_cost / total_quantity;
            self.quantity = new_quantity;
        } else {
            // Reducing, closing, or flipping.
            let closing_quantity = delta.abs().min(self.quantity.abs());
            let realized = if self.quantity > Decimal::ZERO {
                (fill.price - self.average_price) * closing_quantity
            } else {
                (self.average_price - fill.price) * closing_quantity
            };
            self.realized_pnl += realized;

            let remaining = self.quantity.abs() - closing_quantity;
            if remaining == Decimal::ZERO {
                if delta.abs() > self.quantity.abs() {
                    // Flipped through zero: the excess opens a new position.
                    let excess = delta.abs() - self.quantity.abs();
                    self.quantity = if delta > Decimal::ZERO { excess } else { -excess };
                    self.average_price = fill.price;
                } else {
                    self.quantity = Decimal::ZERO;
                    self.average_price = Decimal::ZERO;
                }
            } else {
                self.quantity = if self.quantity > Decimal::ZERO { remaining } else { -remaining };
            }
        }

        if self.quantity == Decimal::ZERO {
            self.mark = Decimal::ZERO;
            self.unrealized_pnl = Decimal::ZERO;
            self.market_value = Decimal::ZERO;
        } else {
            self.update_mark(self.mark.max(fill.price));
            self.update_mark(fill.price);
        }
        self.last_updated = fill.timestamp;
    }

    /// Refresh the mark (most recent observed price) and recompute derived
    /// market value / unrealized P&L.
    pub fn update_mark(&mut self, mark: Decimal) {
        if self.quantity == Decimal::ZERO {
            self.mark = Decimal::ZERO;
            self.market_value = Decimal::ZERO;
            self.unrealized_pnl = Decimal::ZERO;
            return;
        }
        self.mark = mark;
        self.market_value = self.quantity.abs() * mark;
        self.unrealized_pnl = (mark - self.average_price) * self.quantity;
        self.last_updated = Utc::now();
    }

    pub fn total_pnl(&self) -> Decimal {
        self.realized_pnl + self.unrealized_pnl
    }
}

/// Account-level balances. Equity is derived: `cash + positions_value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub account_id: String,
    pub initial_capital: Decimal,
    pub cash: Decimal,
    pub positions_value: Decimal,
    pub buying_power: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
}

impl Account {
    pub fn new(account_id: impl Into<String>, initial_capital: Decimal) -> Self {
        Self {
            account_id: account_id.into(),
            initial_capital,
            cash: initial_capital,
            positions_value: Decimal::ZERO,
            buying_power: initial_capital,
            unrealized_pnl: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
        }
    }

    pub fn equity(&self) -> Decimal {
        self.cash + self.positions_value
    }
}

/// Risk limit configuration (spec.md §3 "Risk limits").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskLimits {
    pub max_position_size: Decimal,
    pub max_position_pct: Decimal,
    pub max_leverage: Decimal,
    pub max_portfolio_risk: Decimal,
    pub max_drawdown: Decimal,
    pub max_daily_loss: Decimal,
    pub max_daily_loss_pct: Decimal,
    pub max_total_exposure: Decimal,
    pub max_long_exposure: Decimal,
    pub max_short_exposure: Decimal,
    pub max_orders_per_second: u32,
    pub max_orders_per_minute: u32,
    pub default_stop_loss_pct: Decimal,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_position_size: Decimal::from(10_000),
            max_position_pct: Decimal::new(20, 2),       // 20%
            max_leverage: Decimal::from(2),
            max_portfolio_risk: Decimal::new(10, 2),     // 10%
            max_drawdown: Decimal::new(20, 2),           // 20%
            max_daily_loss: Decimal::from(5_000),
            max_daily_loss_pct: Decimal::new(5, 2),      // 5%
            max_total_exposure: Decimal::from(500_000),
            max_long_exposure: Decimal::from(300_000),
            max_short_exposure: Decimal::from(300_000),
            max_orders_per_second: 5,
            max_orders_per_minute: 100,
            default_stop_loss_pct: Decimal::new(2, 2),   // 2%
        }
    }
}

/// Side of a closed round-trip trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    Long,
    Short,
}

/// A closed round-trip trade recorded by the P&L Tracker (C8).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: Symbol,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub quantity: Decimal,
    pub side: TradeSide,
    pub gross_pnl: Decimal,
    pub pnl_pct: Decimal,
    pub commission: Decimal,
    pub net_pnl: Decimal,
}

impl TradeRecord {
    /// Build a trade record applying the numerics of spec.md §4.8: gross is
    /// `(exit-entry)*qty` for longs, `(entry-exit)*qty` for shorts; net is
    /// gross minus commission; percentage guards against a zero denominator.
    pub fn new(
        symbol: Symbol,
        entry_time: DateTime<Utc>,
        exit_time: DateTime<Utc>,
        entry_price: Decimal,
        exit_price: Decimal,
        quantity: Decimal,
        side: TradeSide,
        commission: Decimal,
    ) -> Self {
        let gross_pnl = match side {
            TradeSide::Long => (exit_price - entry_price) * quantity,
            TradeSide::Short => (entry_price - exit_price) * quantity,
        };
        let net_pnl = gross_pnl - commission;
        let denom = entry_price * quantity;
        let pnl_pct = if denom != Decimal::ZERO {
            gross_pnl / denom
        } else {
            Decimal::ZERO
        };

        Self {
            symbol,
            entry_time,
            exit_time,
            entry_price,
            exit_price,
            quantity,
            side,
            gross_pnl,
            pnl_pct,
            commission,
            net_pnl,
        }
    }

    pub fn is_winner(&self) -> bool {
        self.net_pnl > Decimal::ZERO
    }
}

/// Per-calendar-day aggregate P&L (spec.md §3 "DailyPnL").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DailyPnL {
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub commission: Decimal,
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
}

impl DailyPnL {
    pub fn net_pnl(&self) -> Decimal {
        self.realized_pnl + self.unrealized_pnl - self.commission
    }

    pub fn win_rate(&self) -> Decimal {
        if self.total_trades == 0 {
            Decimal::ZERO
        } else {
            Decimal::from(self.winning_trades) / Decimal::from(self.total_trades)
        }
    }

    pub fn record_trade(&mut self, trade: &TradeRecord) {
        self.realized_pnl += trade.gross_pnl;
        self.commission += trade.commission;
        self.total_trades += 1;
        if trade.is_winner() {
            self.winning_trades += 1;
        } else {
            self.losing_trades += 1;
        }
    }
}

/// Durable snapshot of engine state persisted by the State Store (C10).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStateSnapshot {
    pub timestamp: DateTime<Utc>,
    pub state: String,
    pub strategy_name: String,
    pub broker_name: String,
    pub positions: HashMap<String, Position>,
    pub pending_order_ids: HashSet<String>,
    pub statistics: HashMap<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sym() -> Symbol {
        Symbol::equity("AAPL")
    }

    #[test]
    fn position_flat_has_zero_mark_and_unrealized() {
        let mut p = Position::new(sym());
        let fill = Fill::new(
            crate::orders::OrderId::new(),
            sym(),
            Side::Buy,
            dec!(10),
            dec!(100),
            Decimal::ZERO,
            "s",
        );
        p.apply_fill(&fill);
        let closing = Fill::new(
            crate::orders::OrderId::new(),
            sym(),
            Side::Sell,
            dec!(10),
            dec!(110),
            Decimal::ZERO,
            "s",
        );
        p.apply_fill(&closing);
        assert!(p.is_flat());
        assert_eq!(p.mark, Decimal::ZERO);
        assert_eq!(p.unrealized_pnl, Decimal::ZERO);
        assert_eq!(p.realized_pnl, dec!(100));
    }

    #[test]
    fn round_trip_trade_record_matches_s6() {
        let now = Utc::now();
        let t1 = TradeRecord::new(sym(), now, now, dec!(150), dec!(155), dec!(10), TradeSide::Long, dec!(2));
        assert_eq!(t1.net_pnl, dec!(48.0));

        let t2 = TradeRecord::new(Symbol::equity("MSFT"), now, now, dec!(300), dec!(295), dec!(5), TradeSide::Long, dec!(1.5));
        assert_eq!(t2.net_pnl, dec!(-26.5));

        let mut daily = DailyPnL::default();
        daily.record_trade(&t1);
        daily.record_trade(&t2);
        assert_eq!(daily.total_trades, 2);
        assert_eq!(daily.winning_trades, 1);
        assert_eq!(daily.losing_trades, 1);
    }
}
