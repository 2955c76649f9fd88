use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Closed set of event kinds routed by the event bus (C1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    MarketData,
    Tick,
    Bar,
    Signal,
    Order,
    OrderSubmitted,
    OrderAccepted,
    OrderRejected,
    OrderCancelled,
    Fill,
    PartialFill,
    PositionOpened,
    PositionClosed,
    PositionUpdated,
    RiskViolation,
    RiskWarning,
    SystemStart,
    SystemStop,
    SystemError,
    Heartbeat,
}

/// A routed event. Events compare by `priority` only (smaller = earlier);
/// timestamps break no ties, matching spec.md §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub priority: i32,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
    pub source: String,
    pub metadata: serde_json::Value,
}

impl Event {
    pub fn new(priority: i32, kind: EventKind, source: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            priority,
            kind,
            timestamp: Utc::now(),
            payload,
            source: source.into(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority
    }
}
impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority.cmp(&other.priority)
    }
}

/// Default priority bands, lowest first. Components may use any `i32`; these
/// give the engine and bus sensible conventional defaults.
pub mod priority {
    pub const SYSTEM: i32 = 0;
    pub const RISK: i32 = 10;
    pub const ORDER_LIFECYCLE: i32 = 20;
    pub const FILL: i32 = 20;
    pub const SIGNAL: i32 = 30;
    pub const MARKET_DATA: i32 = 40;
    pub const HEARTBEAT: i32 = 50;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_order_by_priority_smaller_first() {
        let low = Event::new(5, EventKind::RiskViolation, "risk", serde_json::Value::Null);
        let high = Event::new(50, EventKind::Heartbeat, "engine", serde_json::Value::Null);
        assert!(low < high);
    }

    #[test]
    fn equal_priority_events_are_equal_for_ordering() {
        let a = Event::new(10, EventKind::Signal, "a", serde_json::Value::Null);
        let b = Event::new(10, EventKind::Fill, "b", serde_json::Value::Null);
        assert_eq!(a.cmp(&b), Ordering::Equal);
    }
}
