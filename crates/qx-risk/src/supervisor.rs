use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{info, warn};

use qx_types::orders::Order;
use qx_types::portfolio::{Account, Position, RiskLimits};

use crate::severity::{RiskSeverity, RiskViolation, RuleTag};

/// Result of running an order candidate through every rule. `safe` is false
/// if any `High` or `Critical` violation fired; `Low`/`Medium` violations are
/// warnings that do not block submission.
#[derive(Debug, Clone)]
pub struct RiskCheckOutcome {
    pub safe: bool,
    pub violations: Vec<RiskViolation>,
}

impl RiskCheckOutcome {
    fn from_violations(violations: Vec<RiskViolation>) -> Self {
        let safe = !violations
            .iter()
            .any(|v| v.severity >= RiskSeverity::High);
        Self { safe, violations }
    }
}

type ViolationCallback = Box<dyn Fn(&RiskViolation) + Send + Sync>;
type KillSwitchCallback = Box<dyn Fn(&str) + Send + Sync>;

struct SessionState {
    peak_equity: Decimal,
    daily_start_equity: Decimal,
    order_timestamps: VecDeque<DateTime<Utc>>,
    kill_switch_active: bool,
    kill_switch_reason: Option<String>,
}

/// The Risk Supervisor (C5). Stateless with respect to any particular order:
/// callers pass the current `Account`/positions snapshot on every check.
pub struct RiskSupervisor {
    limits: RiskLimits,
    state: Mutex<SessionState>,
    violation_callbacks: Mutex<Vec<ViolationCallback>>,
    kill_switch_callbacks: Mutex<Vec<KillSwitchCallback>>,
}

impl RiskSupervisor {
    pub fn new(limits: RiskLimits, starting_equity: Decimal) -> Self {
        Self {
            limits,
            state: Mutex::new(SessionState {
                peak_equity: starting_equity,
                daily_start_equity: starting_equity,
                order_timestamps: VecDeque::new(),
                kill_switch_active: false,
                kill_switch_reason: None,
            }),
            violation_callbacks: Mutex::new(Vec::new()),
            kill_switch_callbacks: Mutex::new(Vec::new()),
        }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    pub fn register_violation_callback(&self, cb: impl Fn(&RiskViolation) + Send + Sync + 'static) {
        self.violation_callbacks.lock().push(Box::new(cb));
    }

    pub fn register_kill_switch_callback(&self, cb: impl Fn(&str) + Send + Sync + 'static) {
        self.kill_switch_callbacks.lock().push(Box::new(cb));
    }

    pub fn is_kill_switch_active(&self) -> bool {
        self.state.lock().kill_switch_active
    }

    pub fn trigger_kill_switch(&self, reason: impl Into<String>) {
        let reason = reason.into();
        {
            let mut state = self.state.lock();
            state.kill_switch_active = true;
            state.kill_switch_reason = Some(reason.clone());
        }
        warn!(reason = %reason, "kill switch activated");
        for cb in self.kill_switch_callbacks.lock().iter() {
            cb(&reason);
        }
    }

    pub fn deactivate_kill_switch(&self) {
        let mut state = self.state.lock();
        state.kill_switch_active = false;
        state.kill_switch_reason = None;
        info!("kill switch deactivated");
    }

    /// Reset the per-day baseline used by `max_daily_loss`/`max_daily_loss_pct`.
    pub fn reset_daily_metrics(&self, equity: Decimal) {
        let mut state = self.state.lock();
        state.daily_start_equity = equity;
        state.order_timestamps.clear();
        info!(equity = %equity, "daily risk metrics reset");
    }

    /// Update the running equity peak used by `max_drawdown`.
    pub fn update_peak_equity(&self, equity: Decimal) {
        let mut state = self.state.lock();
        if equity > state.peak_equity {
            state.peak_equity = equity;
        }
    }

    /// Record that an order was just submitted, for the rate-limit rules.
    pub fn record_order_submission(&self) {
        let mut state = self.state.lock();
        state.order_timestamps.push_back(Utc::now());
        let cutoff = Utc::now() - Duration::minutes(1);
        while state
            .order_timestamps
            .front()
            .is_some_and(|ts| *ts < cutoff)
        {
            state.order_timestamps.pop_front();
        }
    }

    /// Run every rule in spec.md §4.5's table against a candidate order.
    pub fn check_order(
        &self,
        order: &Order,
        account: &Account,
        positions: &HashMap<String, Position>,
    ) -> RiskCheckOutcome {
        let mut violations = Vec::new();

        if let Some(v) = self.check_kill_switch() {
            violations.push(v);
            // Kill switch blocks outright; no point evaluating further rules.
            self.notify(&violations);
            return RiskCheckOutcome::from_violations(violations);
        }

        violations.extend(self.check_order_rate());
        violations.extend(self.check_position_limits(order, account, positions));
        violations.extend(self.check_exposure_limits(order, positions));
        violations.extend(self.check_daily_loss(account));
        violations.extend(self.check_drawdown(account));

        self.notify(&violations);
        RiskCheckOutcome::from_violations(violations)
    }

    fn notify(&self, violations: &[RiskViolation]) {
        let callbacks = self.violation_callbacks.lock();
        for v in violations {
            for cb in callbacks.iter() {
                cb(v);
            }
        }
    }

    fn check_kill_switch(&self) -> Option<RiskViolation> {
        let state = self.state.lock();
        if state.kill_switch_active {
            let reason = state.kill_switch_reason.clone().unwrap_or_default();
            Some(RiskViolation::new(
                RuleTag::KillSwitchActive,
                format!("kill switch is active: {reason}"),
            ))
        } else {
            None
        }
    }

    fn check_order_rate(&self) -> Vec<RiskViolation> {
        let state = self.state.lock();
        let now = Utc::now();
        let one_sec_ago = now - Duration::seconds(1);
        let per_second = state
            .order_timestamps
            .iter()
            .filter(|ts| **ts >= one_sec_ago)
            .count() as u32;
        let per_minute = state.order_timestamps.len() as u32;

        let mut out = Vec::new();
        if per_second >= self.limits.max_orders_per_second {
            out.push(RiskViolation::new(
                RuleTag::OrderRatePerSecond,
                format!("{per_second} orders in the last second (limit {})", self.limits.max_orders_per_second),
            ));
        }
        if per_minute >= self.limits.max_orders_per_minute {
            out.push(RiskViolation::new(
                RuleTag::OrderRatePerMinute,
                format!("{per_minute} orders in the last minute (limit {})", self.limits.max_orders_per_minute),
            ));
        }
        out
    }

    fn estimate_order_price(&self, order: &Order, positions: &HashMap<String, Position>) -> Option<Decimal> {
        order.order_type.limit_price().or_else(|| {
            positions
                .get(&order.symbol.to_string())
                .filter(|p| !p.mark.is_zero())
                .map(|p| p.mark)
        })
    }

    fn check_position_limits(
        &self,
        order: &Order,
        account: &Account,
        positions: &HashMap<String, Position>,
    ) -> Vec<RiskViolation> {
        let Some(price) = self.estimate_order_price(order, positions) else {
            return Vec::new();
        };
        let existing = positions
            .get(&order.symbol.to_string())
            .map(|p| p.quantity)
            .unwrap_or(Decimal::ZERO);
        let delta = match order.side {
            qx_types::orders::Side::Buy => order.quantity,
            qx_types::orders::Side::Sell => -order.quantity,
        };
        let prospective_notional = (existing + delta).abs() * price;

        let mut out = Vec::new();
        if prospective_notional > self.limits.max_position_size {
            out.push(RiskViolation::new(
                RuleTag::MaxPositionSize,
                format!(
                    "prospective position notional {prospective_notional} exceeds limit {}",
                    self.limits.max_position_size
                ),
            ));
        }
        let equity = account.equity();
        if equity > Decimal::ZERO {
            let pct = prospective_notional / equity;
            if pct > self.limits.max_position_pct {
                out.push(RiskViolation::new(
                    RuleTag::MaxPositionPct,
                    format!(
                        "prospective position is {pct:.4} of equity, limit {}",
                        self.limits.max_position_pct
                    ),
                ));
            }
        }
        out
    }

    fn check_exposure_limits(&self, order: &Order, positions: &HashMap<String, Position>) -> Vec<RiskViolation> {
        let Some(price) = self.estimate_order_price(order, positions) else {
            return Vec::new();
        };
        let delta = match order.side {
            qx_types::orders::Side::Buy => order.quantity,
            qx_types::orders::Side::Sell => -order.quantity,
        };
        let order_notional = order.quantity * price;

        let mut long_exposure = Decimal::ZERO;
        let mut short_exposure = Decimal::ZERO;
        for (symbol, position) in positions {
            let notional = position.quantity.abs() * position.mark;
            if symbol == &order.symbol.to_string() {
                continue;
            }
            if position.is_long() {
                long_exposure += notional;
            } else if position.is_short() {
                short_exposure += notional;
            }
        }
        let existing = positions
            .get(&order.symbol.to_string())
            .map(|p| p.quantity)
            .unwrap_or(Decimal::ZERO);
        let prospective = existing + delta;
        if prospective > Decimal::ZERO {
            long_exposure += prospective.abs() * price;
        } else if prospective < Decimal::ZERO {
            short_exposure += prospective.abs() * price;
        }
        let _ = order_notional;

        let mut out = Vec::new();
        if long_exposure > self.limits.max_long_exposure {
            out.push(RiskViolation::new(
                RuleTag::MaxLongExposure,
                format!("long exposure {long_exposure} exceeds limit {}", self.limits.max_long_exposure),
            ));
        }
        if short_exposure > self.limits.max_short_exposure {
            out.push(RiskViolation::new(
                RuleTag::MaxShortExposure,
                format!("short exposure {short_exposure} exceeds limit {}", self.limits.max_short_exposure),
            ));
        }
        let total = long_exposure + short_exposure;
        if total > self.limits.max_total_exposure {
            out.push(RiskViolation::new(
                RuleTag::MaxTotalExposure,
                format!("total exposure {total} exceeds limit {}", self.limits.max_total_exposure),
            ));
        }
        out
    }

    fn check_daily_loss(&self, account: &Account) -> Vec<RiskViolation> {
        let state = self.state.lock();
        let loss = state.daily_start_equity - account.equity();
        let mut out = Vec::new();
        if loss >= self.limits.max_daily_loss {
            out.push(RiskViolation::new(
                RuleTag::MaxDailyLoss,
                format!("daily loss {loss} exceeds limit {}", self.limits.max_daily_loss),
            ));
        }
        if state.daily_start_equity > Decimal::ZERO {
            let pct = loss / state.daily_start_equity;
            if pct >= self.limits.max_daily_loss_pct {
                out.push(RiskViolation::new(
                    RuleTag::MaxDailyLossPct,
                    format!("daily loss is {pct:.4} of start-of-day equity, limit {}", self.limits.max_daily_loss_pct),
                ));
            }
        }
        out
    }

    fn check_drawdown(&self, account: &Account) -> Vec<RiskViolation> {
        let state = self.state.lock();
        if state.peak_equity == Decimal::ZERO {
            return Vec::new();
        }
        let drawdown = (state.peak_equity - account.equity()) / state.peak_equity;
        if drawdown >= self.limits.max_drawdown {
            vec![RiskViolation::new(
                RuleTag::MaxDrawdown,
                format!("drawdown {drawdown:.4} exceeds limit {}", self.limits.max_drawdown),
            )]
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qx_types::market::Symbol;
    use qx_types::orders::{Order, OrderType, Side};
    use rust_decimal_macros::dec;

    fn account(equity: Decimal) -> Account {
        let mut a = Account::new("acc-1", equity);
        a.cash = equity;
        a
    }

    #[test]
    fn kill_switch_blocks_everything() {
        let supervisor = RiskSupervisor::new(RiskLimits::default(), dec!(100_000));
        supervisor.trigger_kill_switch("manual halt");
        let order = Order::market(Symbol::equity("AAPL"), Side::Buy, dec!(1), "s");
        let outcome = supervisor.check_order(&order, &account(dec!(100_000)), &HashMap::new());
        assert!(!outcome.safe);
        assert_eq!(outcome.violations[0].rule, RuleTag::KillSwitchActive);
    }

    #[test]
    fn order_rate_per_second_trips_after_limit() {
        let mut limits = RiskLimits::default();
        limits.max_orders_per_second = 2;
        let supervisor = RiskSupervisor::new(limits, dec!(100_000));
        supervisor.record_order_submission();
        supervisor.record_order_submission();
        let order = Order::market(Symbol::equity("AAPL"), Side::Buy, dec!(1), "s");
        let outcome = supervisor.check_order(&order, &account(dec!(100_000)), &HashMap::new());
        assert!(outcome
            .violations
            .iter()
            .any(|v| v.rule == RuleTag::OrderRatePerSecond));
    }

    #[test]
    fn max_position_size_blocks_oversized_order() {
        let mut limits = RiskLimits::default();
        limits.max_position_size = dec!(1_000);
        let supervisor = RiskSupervisor::new(limits, dec!(100_000));
        let order = Order::new(
            Symbol::equity("AAPL"),
            Side::Buy,
            dec!(100),
            OrderType::Limit { price: dec!(50) },
            "s",
        );
        let outcome = supervisor.check_order(&order, &account(dec!(100_000)), &HashMap::new());
        assert!(!outcome.safe);
        assert!(outcome.violations.iter().any(|v| v.rule == RuleTag::MaxPositionSize));
    }

    #[test]
    fn drawdown_zero_when_peak_is_zero() {
        let supervisor = RiskSupervisor::new(RiskLimits::default(), Decimal::ZERO);
        let order = Order::market(Symbol::equity("AAPL"), Side::Buy, dec!(1), "s");
        let outcome = supervisor.check_order(&order, &account(Decimal::ZERO), &HashMap::new());
        assert!(!outcome.violations.iter().any(|v| v.rule == RuleTag::MaxDrawdown));
    }

    #[test]
    fn reset_daily_metrics_clears_order_timestamps() {
        let supervisor = RiskSupervisor::new(RiskLimits::default(), dec!(100_000));
        supervisor.record_order_submission();
        supervisor.reset_daily_metrics(dec!(100_000));
        assert_eq!(supervisor.state.lock().order_timestamps.len(), 0);
    }
}
