use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::info;

use qx_types::market::Symbol;
use qx_types::orders::{Fill, Side};
use qx_types::portfolio::{DailyPnL, Position, TradeRecord, TradeSide};

/// Tracks open "lots" per symbol so a closing fill can be matched back to its
/// opening fill and turned into a [`TradeRecord`].
#[derive(Debug, Clone)]
struct OpenLot {
    side: TradeSide,
    quantity: Decimal,
    price: Decimal,
    opened_at: chrono::DateTime<Utc>,
}

/// Summary statistics aggregated over every closed trade, grounded in the
/// original implementation's shared backtest/live metrics module.
#[derive(Debug, Clone, Default)]
pub struct PerformanceSummary {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: Decimal,
    pub average_win: Decimal,
    pub average_loss: Decimal,
    pub profit_factor: Decimal,
    pub total_net_pnl: Decimal,
}

/// Real-time snapshot returned by [`PnlTracker::get_snapshot`], mirrored from
/// `execution/live_pnl.py`'s `LivePnLSnapshot`.
#[derive(Debug, Clone)]
pub struct PnlSnapshot {
    pub timestamp: DateTime<Utc>,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub total_pnl: Decimal,
    pub daily_pnl: Decimal,
    pub total_commission: Decimal,
    pub open_positions: usize,
    pub closed_trades: usize,
    pub win_rate: Decimal,
    pub current_drawdown: Decimal,
}

/// The P&L Tracker (C8): converts a fill stream into closed [`TradeRecord`]s
/// (FIFO lot matching, average-cost on overlapping same-direction fills),
/// maintains a per-day ledger and equity curve, and aggregates live
/// unrealized P&L from currently held positions, grounded in
/// `execution/live_pnl.py`'s `LivePnLTracker`.
pub struct PnlTracker {
    initial_capital: Decimal,
    open_lots: HashMap<String, OpenLot>,
    trades: Vec<TradeRecord>,
    daily: HashMap<NaiveDate, DailyPnL>,
    equity_curve: Vec<(DateTime<Utc>, Decimal)>,
    position_pnl: HashMap<String, Decimal>,
    realized_pnl: Decimal,
    total_commission: Decimal,
    peak_equity: Decimal,
    current_equity: Decimal,
}

impl PnlTracker {
    pub fn new(initial_capital: Decimal) -> Self {
        Self {
            initial_capital,
            open_lots: HashMap::new(),
            trades: Vec::new(),
            daily: HashMap::new(),
            equity_curve: vec![(Utc::now(), initial_capital)],
            position_pnl: HashMap::new(),
            realized_pnl: Decimal::ZERO,
            total_commission: Decimal::ZERO,
            peak_equity: initial_capital,
            current_equity: initial_capital,
        }
    }

    fn push_equity_point(&mut self, equity: Decimal, at: DateTime<Utc>) {
        self.equity_curve.push((at, equity));
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
        self.current_equity = equity;
    }

    /// Record a fill. Opens, extends, or closes a lot; closing (fully or
    /// partially) produces a [`TradeRecord`] for the closed portion and rolls
    /// it into realized P&L, the daily ledger, and the equity curve.
    pub fn record_fill(&mut self, symbol: &Symbol, fill: &Fill) -> Option<TradeRecord> {
        let key = symbol.to_string();
        let fill_side = match fill.side {
            Side::Buy => TradeSide::Long,
            Side::Sell => TradeSide::Short,
        };

        match self.open_lots.get(&key).cloned() {
            None => {
                self.open_lots.insert(
                    key,
                    OpenLot {
                        side: fill_side,
                        quantity: fill.quantity,
                        price: fill.price,
                        opened_at: fill.timestamp,
                    },
                );
                None
            }
            Some(lot) if lot.side == fill_side => {
                // Extending the same direction: blend the lot's cost basis.
                let total_qty = lot.quantity + fill.quantity;
                let blended_price = (lot.price * lot.quantity + fill.price * fill.quantity) / total_qty;
                self.open_lots.insert(
                    key,
                    OpenLot {
                        side: lot.side,
                        quantity: total_qty,
                        price: blended_price,
                        opened_at: lot.opened_at,
                    },
                );
                None
            }
            Some(lot) => {
                // Opposite direction: closes (fully or partially) the lot.
                let closing_qty = fill.quantity.min(lot.quantity);
                let trade = TradeRecord::new(
                    symbol.clone(),
                    lot.opened_at,
                    fill.timestamp,
                    lot.price,
                    fill.price,
                    closing_qty,
                    lot.side,
                    fill.commission,
                );
                self.daily.entry(fill.timestamp.date_naive()).or_default().record_trade(&trade);

                let remaining = lot.quantity - closing_qty;
                if remaining > Decimal::ZERO {
                    self.open_lots.insert(
                        symbol.to_string(),
                        OpenLot { side: lot.side, quantity: remaining, price: lot.price, opened_at: lot.opened_at },
                    );
                } else {
                    self.open_lots.remove(&symbol.to_string());
                    let leftover = fill.quantity - closing_qty;
                    if leftover > Decimal::ZERO {
                        self.open_lots.insert(
                            symbol.to_string(),
                            OpenLot { side: fill_side, quantity: leftover, price: fill.price, opened_at: fill.timestamp },
                        );
                    }
                }

                self.realized_pnl += trade.net_pnl;
                self.total_commission += trade.commission;
                self.trades.push(trade.clone());
                let total_equity = self.get_total_equity();
                self.push_equity_point(total_equity, fill.timestamp);

                info!(symbol = %symbol, pnl = %trade.net_pnl, "trade closed");
                Some(trade)
            }
        }
    }

    /// Manually record an externally computed equity reading (e.g. the
    /// account equity observed at a heartbeat tick), advancing the equity
    /// curve and running peak the same way a closed trade does.
    pub fn record_equity(&mut self, equity: Decimal) {
        self.push_equity_point(equity, Utc::now());
    }

    /// Update the unrealized P&L tracked for a single symbol from its current
    /// quantity/average cost/mark. A flat (`quantity == 0`) position is
    /// recorded as zero P&L rather than removed, matching
    /// `update_position_pnl` in the original tracker.
    pub fn update_position_pnl(&mut self, symbol: &str, quantity: Decimal, average_price: Decimal, current_price: Decimal) -> Decimal {
        if quantity.is_zero() {
            self.position_pnl.insert(symbol.to_string(), Decimal::ZERO);
            return Decimal::ZERO;
        }
        let pnl = (current_price - average_price) * quantity;
        self.position_pnl.insert(symbol.to_string(), pnl);
        pnl
    }

    /// Refresh unrealized P&L for every symbol from a positions snapshot,
    /// typically the engine's locally tracked position book.
    pub fn update_from_positions(&mut self, positions: &HashMap<String, Position>) {
        for position in positions.values() {
            self.update_position_pnl(&position.symbol.to_string(), position.quantity, position.average_price, position.mark);
        }
    }

    pub fn get_unrealized_pnl(&self) -> Decimal {
        self.position_pnl.values().sum()
    }

    pub fn get_total_pnl(&self) -> Decimal {
        self.realized_pnl + self.get_unrealized_pnl()
    }

    pub fn get_total_equity(&self) -> Decimal {
        self.initial_capital + self.get_total_pnl()
    }

    /// Live drawdown off the running peak and the most recently recorded
    /// equity point, `(peak - current) / peak`. Distinct from a historical
    /// worst-case drawdown: this reflects where the account stands right now.
    pub fn get_current_drawdown(&self) -> Decimal {
        if self.peak_equity.is_zero() {
            return Decimal::ZERO;
        }
        ((self.peak_equity - self.current_equity) / self.peak_equity).max(Decimal::ZERO)
    }

    pub fn daily_pnl(&self, date: NaiveDate) -> Option<&DailyPnL> {
        self.daily.get(&date)
    }

    pub fn trades(&self) -> &[TradeRecord] {
        &self.trades
    }

    /// Closed trades, most recent first, optionally capped to `limit`.
    pub fn get_trades(&self, limit: Option<usize>) -> Vec<TradeRecord> {
        let mut trades = self.trades.clone();
        trades.sort_by(|a, b| b.exit_time.cmp(&a.exit_time));
        if let Some(n) = limit {
            trades.truncate(n);
        }
        trades
    }

    pub fn get_equity_curve(&self) -> Vec<(DateTime<Utc>, Decimal)> {
        self.equity_curve.clone()
    }

    /// Start a fresh trading day's ledger entry if one doesn't already exist.
    pub fn reset_daily(&mut self) {
        let today = Utc::now().date_naive();
        self.daily.entry(today).or_default();
        info!(date = %today, "started new trading day");
    }

    /// Real-time snapshot combining realized, unrealized, and daily P&L.
    pub fn get_snapshot(&self) -> PnlSnapshot {
        let unrealized = self.get_unrealized_pnl();
        let today = Utc::now().date_naive();
        let daily_pnl = self.daily.get(&today).map(|d| d.net_pnl()).unwrap_or(Decimal::ZERO);
        let total_trades = self.trades.len();
        let winners = self.trades.iter().filter(|t| t.is_winner()).count();
        let win_rate = if total_trades == 0 {
            Decimal::ZERO
        } else {
            Decimal::from(winners as u64) / Decimal::from(total_trades as u64)
        };
        let open_positions = self.position_pnl.values().filter(|pnl| !pnl.is_zero()).count();

        PnlSnapshot {
            timestamp: Utc::now(),
            unrealized_pnl: unrealized,
            realized_pnl: self.realized_pnl,
            total_pnl: self.realized_pnl + unrealized,
            daily_pnl,
            total_commission: self.total_commission,
            open_positions,
            closed_trades: total_trades,
            win_rate,
            current_drawdown: self.get_current_drawdown(),
        }
    }

    pub fn performance_summary(&self) -> PerformanceSummary {
        let total_trades = self.trades.len();
        let winners: Vec<&TradeRecord> = self.trades.iter().filter(|t| t.is_winner()).collect();
        let losers: Vec<&TradeRecord> = self.trades.iter().filter(|t| !t.is_winner()).collect();

        let win_rate = if total_trades == 0 {
            Decimal::ZERO
        } else {
            Decimal::from(winners.len() as u64) / Decimal::from(total_trades as u64)
        };
        let average_win = if winners.is_empty() {
            Decimal::ZERO
        } else {
            winners.iter().map(|t| t.net_pnl).sum::<Decimal>() / Decimal::from(winners.len() as u64)
        };
        let average_loss = if losers.is_empty() {
            Decimal::ZERO
        } else {
            losers.iter().map(|t| t.net_pnl).sum::<Decimal>() / Decimal::from(losers.len() as u64)
        };
        let gross_profit: Decimal = winners.iter().map(|t| t.net_pnl).sum();
        let gross_loss: Decimal = losers.iter().map(|t| t.net_pnl).sum::<Decimal>().abs();
        let profit_factor = if gross_loss == Decimal::ZERO {
            Decimal::ZERO
        } else {
            gross_profit / gross_loss
        };

        PerformanceSummary {
            total_trades,
            winning_trades: winners.len(),
            losing_trades: losers.len(),
            win_rate,
            average_win,
            average_loss,
            profit_factor,
            total_net_pnl: self.trades.iter().map(|t| t.net_pnl).sum(),
        }
    }
}

impl Default for PnlTracker {
    fn default() -> Self {
        Self::new(Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qx_types::orders::OrderId;
    use rust_decimal_macros::dec;

    fn fill(side: Side, qty: Decimal, price: Decimal) -> Fill {
        Fill::new(OrderId::new(), Symbol::equity("AAPL"), side, qty, price, Decimal::ZERO, "s")
    }

    #[test]
    fn opening_fill_produces_no_trade() {
        let mut tracker = PnlTracker::default();
        let trade = tracker.record_fill(&Symbol::equity("AAPL"), &fill(Side::Buy, dec!(10), dec!(100)));
        assert!(trade.is_none());
    }

    #[test]
    fn closing_fill_produces_a_trade_record() {
        let mut tracker = PnlTracker::default();
        tracker.record_fill(&Symbol::equity("AAPL"), &fill(Side::Buy, dec!(10), dec!(100)));
        let trade = tracker.record_fill(&Symbol::equity("AAPL"), &fill(Side::Sell, dec!(10), dec!(110)));
        assert!(trade.is_some());
        assert_eq!(trade.unwrap().net_pnl, dec!(100));
        assert_eq!(tracker.get_total_pnl(), dec!(100));
    }

    #[test]
    fn performance_summary_counts_winners_and_losers() {
        let mut tracker = PnlTracker::default();
        tracker.record_fill(&Symbol::equity("AAPL"), &fill(Side::Buy, dec!(10), dec!(100)));
        tracker.record_fill(&Symbol::equity("AAPL"), &fill(Side::Sell, dec!(10), dec!(110)));
        tracker.record_fill(&Symbol::equity("AAPL"), &fill(Side::Buy, dec!(10), dec!(100)));
        tracker.record_fill(&Symbol::equity("AAPL"), &fill(Side::Sell, dec!(10), dec!(90)));

        let summary = tracker.performance_summary();
        assert_eq!(summary.total_trades, 2);
        assert_eq!(summary.winning_trades, 1);
        assert_eq!(summary.losing_trades, 1);
    }

    #[test]
    fn current_drawdown_reflects_live_equity_not_historical_worst() {
        let mut tracker = PnlTracker::default();
        tracker.record_equity(dec!(100_000));
        tracker.record_equity(dec!(120_000));
        tracker.record_equity(dec!(90_000));
        assert_eq!(tracker.get_current_drawdown(), dec!(0.25));

        tracker.record_equity(dec!(119_000));
        // Recovered to near the peak: current drawdown is small, not the
        // historical 0.25 worst-case.
        let dd = tracker.get_current_drawdown();
        assert!(dd < dec!(0.01), "expected a small live drawdown, got {dd}");
    }

    #[test]
    fn unrealized_pnl_aggregates_across_open_positions() {
        let mut tracker = PnlTracker::default();
        let mut positions = HashMap::new();
        let mut aapl = Position::new(Symbol::equity("AAPL"));
        aapl.quantity = dec!(10);
        aapl.average_price = dec!(100);
        aapl.mark = dec!(110);
        positions.insert("NASDAQ:AAPL".to_string(), aapl);

        tracker.update_from_positions(&positions);
        assert_eq!(tracker.get_unrealized_pnl(), dec!(100));
        assert_eq!(tracker.get_total_pnl(), dec!(100));
    }

    #[test]
    fn get_trades_respects_limit_and_recency_order() {
        let mut tracker = PnlTracker::default();
        tracker.record_fill(&Symbol::equity("AAPL"), &fill(Side::Buy, dec!(10), dec!(100)));
        tracker.record_fill(&Symbol::equity("AAPL"), &fill(Side::Sell, dec!(10), dec!(110)));
        tracker.record_fill(&Symbol::equity("AAPL"), &fill(Side::Buy, dec!(10), dec!(100)));
        tracker.record_fill(&Symbol::equity("AAPL"), &fill(Side::Sell, dec!(10), dec!(120)));

        let trades = tracker.get_trades(Some(1));
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].net_pnl, dec!(200));
    }
}
