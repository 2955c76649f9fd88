use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use qx_types::portfolio::Position;

/// Kind of disagreement found between the local and broker position books,
/// mirrored from `execution/position_sync.py`'s `DiscrepancyType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscrepancyType {
    MissingLocal,
    MissingBroker,
    QuantityMismatch,
    PriceMismatch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionDiscrepancy {
    pub symbol: String,
    pub kind: DiscrepancyType,
    pub local_quantity: Option<Decimal>,
    pub broker_quantity: Option<Decimal>,
    pub local_price: Option<Decimal>,
    pub broker_price: Option<Decimal>,
    pub auto_resolved: bool,
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub timestamp: DateTime<Utc>,
    pub discrepancies: Vec<PositionDiscrepancy>,
}

impl ReconciliationReport {
    pub fn has_discrepancies(&self) -> bool {
        !self.discrepancies.is_empty()
    }

    pub fn unresolved_count(&self) -> usize {
        self.discrepancies.iter().filter(|d| !d.auto_resolved).count()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} discrepancies, {} unresolved",
            self.discrepancies.len(),
            self.unresolved_count()
        )
    }
}

/// The Position Synchronizer (C7): periodically compares the locally tracked
/// position book against the broker's, reconciling everything except price
/// disagreements (which are logged only — a price mismatch usually means the
/// local mark is stale, not that a trade was missed).
pub struct PositionSynchronizer {
    price_tolerance: Decimal,
    reports: parking_lot::Mutex<Vec<ReconciliationReport>>,
}

impl PositionSynchronizer {
    pub fn new(price_tolerance: Decimal) -> Self {
        Self {
            price_tolerance,
            reports: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Compare `local` against `broker`, auto-reconciling missing/quantity
    /// discrepancies into `local` in place, and returning a report of
    /// everything found.
    pub fn sync(
        &self,
        local: &mut HashMap<String, Position>,
        broker: &HashMap<String, Position>,
    ) -> ReconciliationReport {
        let mut discrepancies = Vec::new();

        for (symbol, broker_position) in broker {
            match local.get(symbol) {
                None => {
                    discrepancies.push(PositionDiscrepancy {
                        symbol: symbol.clone(),
                        kind: DiscrepancyType::MissingLocal,
                        local_quantity: None,
                        broker_quantity: Some(broker_position.quantity),
                        local_price: None,
                        broker_price: Some(broker_position.mark),
                        auto_resolved: true,
                    });
                    local.insert(symbol.clone(), broker_position.clone());
                }
                Some(local_position) => {
                    if local_position.quantity != broker_position.quantity {
                        discrepancies.push(PositionDiscrepancy {
                            symbol: symbol.clone(),
                            kind: DiscrepancyType::QuantityMismatch,
                            local_quantity: Some(local_position.quantity),
                            broker_quantity: Some(broker_position.quantity),
                            local_price: None,
                            broker_price: None,
                            auto_resolved: true,
                        });
                        let mut corrected = local_position.clone();
                        corrected.quantity = broker_position.quantity;
                        corrected.average_price = broker_position.average_price;
                        local.insert(symbol.clone(), corrected);
                    } else if (local_position.mark - broker_position.mark).abs() > self.price_tolerance {
                        warn!(
                            symbol = %symbol,
                            local_price = %local_position.mark,
                            broker_price = %broker_position.mark,
                            "position price mismatch, not auto-resolving"
                        );
                        discrepancies.push(PositionDiscrepancy {
                            symbol: symbol.clone(),
                            kind: DiscrepancyType::PriceMismatch,
                            local_quantity: None,
                            broker_quantity: None,
                            local_price: Some(local_position.mark),
                            broker_price: Some(broker_position.mark),
                            auto_resolved: false,
                        });
                    }
                }
            }
        }

        let mut to_flatten = Vec::new();
        for (symbol, local_position) in local.iter() {
            if !broker.contains_key(symbol) && !local_position.is_flat() {
                discrepancies.push(PositionDiscrepancy {
                    symbol: symbol.clone(),
                    kind: DiscrepancyType::MissingBroker,
                    local_quantity: Some(local_position.quantity),
                    broker_quantity: None,
                    local_price: None,
                    broker_price: None,
                    auto_resolved: true,
                });
                to_flatten.push((symbol.clone(), local_position.symbol.clone()));
            }
        }
        for (key, symbol) in to_flatten {
            local.insert(key, Position::new(symbol));
        }

        let report = ReconciliationReport {
            timestamp: Utc::now(),
            discrepancies,
        };
        info!(summary = %report.summary(), "position reconciliation complete");
        self.reports.lock().push(report.clone());
        report
    }

    pub fn recent_reports(&self, limit: usize) -> Vec<ReconciliationReport> {
        let reports = self.reports.lock();
        reports.iter().rev().take(limit).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qx_types::market::Symbol;
    use rust_decimal_macros::dec;

    fn position(symbol: &str, qty: Decimal, mark: Decimal) -> Position {
        let mut p = Position::new(Symbol::equity(symbol));
        p.quantity = qty;
        p.average_price = mark;
        p.mark = mark;
        p
    }

    #[test]
    fn missing_local_position_is_auto_adopted() {
        let sync = PositionSynchronizer::new(dec!(0.01));
        let mut local = HashMap::new();
        let mut broker = HashMap::new();
        broker.insert("AAPL".to_string(), position("AAPL", dec!(10), dec!(100)));

        let report = sync.sync(&mut local, &broker);
        assert_eq!(report.discrepancies.len(), 1);
        assert_eq!(report.discrepancies[0].kind, DiscrepancyType::MissingLocal);
        assert!(report.discrepancies[0].auto_resolved);
        assert_eq!(local.get("AAPL").unwrap().quantity, dec!(10));
    }

    #[test]
    fn quantity_mismatch_is_corrected_from_broker() {
        let sync = PositionSynchronizer::new(dec!(0.01));
        let mut local = HashMap::new();
        local.insert("AAPL".to_string(), position("AAPL", dec!(5), dec!(100)));
        let mut broker = HashMap::new();
        broker.insert("AAPL".to_string(), position("AAPL", dec!(10), dec!(100)));

        let report = sync.sync(&mut local, &broker);
        assert_eq!(report.discrepancies[0].kind, DiscrepancyType::QuantityMismatch);
        assert_eq!(local.get("AAPL").unwrap().quantity, dec!(10));
    }

    #[test]
    fn price_mismatch_is_never_auto_resolved() {
        let sync = PositionSynchronizer::new(dec!(0.01));
        let mut local = HashMap::new();
        local.insert("AAPL".to_string(), position("AAPL", dec!(10), dec!(100)));
        let mut broker = HashMap::new();
        broker.insert("AAPL".to_string(), position("AAPL", dec!(10), dec!(105)));

        let report = sync.sync(&mut local, &broker);
        assert_eq!(report.discrepancies[0].kind, DiscrepancyType::PriceMismatch);
        assert!(!report.discrepancies[0].auto_resolved);
        // Local mark is left untouched.
        assert_eq!(local.get("AAPL").unwrap().mark, dec!(100));
    }

    #[test]
    fn missing_broker_non_flat_position_is_auto_flattened() {
        let sync = PositionSynchronizer::new(dec!(0.01));
        let mut local = HashMap::new();
        local.insert("TSLA".to_string(), position("TSLA", dec!(10), dec!(100)));
        let broker = HashMap::new();

        let report = sync.sync(&mut local, &broker);
        assert_eq!(report.discrepancies[0].kind, DiscrepancyType::MissingBroker);
        assert!(report.discrepancies[0].auto_resolved);
        assert!(local.get("TSLA").unwrap().is_flat());
    }
}
