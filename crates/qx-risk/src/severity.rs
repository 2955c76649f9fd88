use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of a risk violation, ordered low to high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for RiskSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskSeverity::Low => "low",
            RiskSeverity::Medium => "medium",
            RiskSeverity::High => "high",
            RiskSeverity::Critical => "critical",
        };
        write!(f, "{}", s)
    }
}

/// The named rule table from spec.md §4.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleTag {
    KillSwitchActive,
    OrderRatePerSecond,
    OrderRatePerMinute,
    MaxPositionSize,
    MaxPositionPct,
    MaxDailyLoss,
    MaxDailyLossPct,
    MaxLongExposure,
    MaxShortExposure,
    MaxTotalExposure,
    MaxDrawdown,
}

impl RuleTag {
    /// The severity a rule carries when it fires, per spec.md §4.5.
    pub fn default_severity(&self) -> RiskSeverity {
        match self {
            RuleTag::KillSwitchActive => RiskSeverity::Critical,
            RuleTag::OrderRatePerSecond => RiskSeverity::High,
            RuleTag::OrderRatePerMinute => RiskSeverity::Medium,
            RuleTag::MaxPositionSize => RiskSeverity::High,
            RuleTag::MaxPositionPct => RiskSeverity::High,
            RuleTag::MaxDailyLoss => RiskSeverity::Critical,
            RuleTag::MaxDailyLossPct => RiskSeverity::Critical,
            RuleTag::MaxLongExposure => RiskSeverity::High,
            RuleTag::MaxShortExposure => RiskSeverity::High,
            RuleTag::MaxTotalExposure => RiskSeverity::High,
            RuleTag::MaxDrawdown => RiskSeverity::Critical,
        }
    }
}

impl fmt::Display for RuleTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RuleTag::KillSwitchActive => "kill_switch_active",
            RuleTag::OrderRatePerSecond => "order_rate_per_second",
            RuleTag::OrderRatePerMinute => "order_rate_per_minute",
            RuleTag::MaxPositionSize => "max_position_size",
            RuleTag::MaxPositionPct => "max_position_pct",
            RuleTag::MaxDailyLoss => "max_daily_loss",
            RuleTag::MaxDailyLossPct => "max_daily_loss_pct",
            RuleTag::MaxLongExposure => "max_long_exposure",
            RuleTag::MaxShortExposure => "max_short_exposure",
            RuleTag::MaxTotalExposure => "max_total_exposure",
            RuleTag::MaxDrawdown => "max_drawdown",
        };
        write!(f, "{}", s)
    }
}

/// A single rule firing against a candidate order or account state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskViolation {
    pub rule: RuleTag,
    pub severity: RiskSeverity,
    pub message: String,
}

impl RiskViolation {
    pub fn new(rule: RuleTag, message: impl Into<String>) -> Self {
        Self {
            severity: rule.default_severity(),
            rule,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering() {
        assert!(RiskSeverity::Low < RiskSeverity::Medium);
        assert!(RiskSeverity::Medium < RiskSeverity::High);
        assert!(RiskSeverity::High < RiskSeverity::Critical);
    }

    #[test]
    fn rule_default_severity_matches_table() {
        assert_eq!(RuleTag::KillSwitchActive.default_severity(), RiskSeverity::Critical);
        assert_eq!(RuleTag::OrderRatePerSecond.default_severity(), RiskSeverity::High);
    }
}
