use rust_decimal::Decimal;

use qx_types::market::Symbol;
use qx_types::orders::{Order, OrderType};

/// A single validation failure. Distinct from a risk violation: these are
/// structural/data problems that make an order impossible to route at all,
/// not account- or market-state-dependent judgments.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationFailure {
    pub rule: &'static str,
    pub message: String,
}

impl ValidationFailure {
    fn new(rule: &'static str, message: impl Into<String>) -> Self {
        Self {
            rule,
            message: message.into(),
        }
    }
}

type Rule = fn(&Order) -> Result<(), ValidationFailure>;

fn positive_quantity(order: &Order) -> Result<(), ValidationFailure> {
    if order.quantity <= Decimal::ZERO {
        Err(ValidationFailure::new(
            "positive_quantity",
            format!("quantity must be positive, got {}", order.quantity),
        ))
    } else {
        Ok(())
    }
}

fn fractional_quantity_allowed(order: &Order) -> Result<(), ValidationFailure> {
    if order.quantity.fract() != Decimal::ZERO && !order.symbol.asset_class.supports_fractional_quantities() {
        Err(ValidationFailure::new(
            "fractional_quantity_allowed",
            format!("{} does not support fractional quantities", order.symbol.asset_class),
        ))
    } else {
        Ok(())
    }
}

fn limit_price_present(order: &Order) -> Result<(), ValidationFailure> {
    match order.order_type {
        OrderType::Limit { price } | OrderType::StopLimit { limit_price: price, .. } if price <= Decimal::ZERO => {
            Err(ValidationFailure::new("limit_price_present", "limit price must be positive"))
        }
        _ => Ok(()),
    }
}

fn stop_price_present(order: &Order) -> Result<(), ValidationFailure> {
    match order.order_type {
        OrderType::Stop { stop_price } | OrderType::StopLimit { stop_price, .. } if stop_price <= Decimal::ZERO => {
            Err(ValidationFailure::new("stop_price_present", "stop price must be positive"))
        }
        _ => Ok(()),
    }
}

fn strategy_id_present(order: &Order) -> Result<(), ValidationFailure> {
    if order.strategy_id.trim().is_empty() {
        Err(ValidationFailure::new("strategy_id_present", "strategy_id must not be empty"))
    } else {
        Ok(())
    }
}

fn symbol_non_empty(order: &Order) -> Result<(), ValidationFailure> {
    if order.symbol.symbol.trim().is_empty() {
        Err(ValidationFailure::new("symbol_non_empty", "symbol must not be empty"))
    } else {
        Ok(())
    }
}

const DEFAULT_RULES: &[Rule] = &[
    positive_quantity,
    fractional_quantity_allowed,
    limit_price_present,
    stop_price_present,
    strategy_id_present,
    symbol_non_empty,
];

/// The Order Validator (C4): purely local, synchronous structural checks run
/// before an order is ever handed to the Risk Supervisor or a broker.
pub struct OrderValidator {
    rules: Vec<Rule>,
    tradable_symbols: Option<Vec<Symbol>>,
}

impl OrderValidator {
    pub fn new() -> Self {
        Self {
            rules: DEFAULT_RULES.to_vec(),
            tradable_symbols: None,
        }
    }

    /// Restrict validation to an allow-list of symbols. `None` (the default)
    /// means every symbol is tradable.
    pub fn with_tradable_symbols(mut self, symbols: Vec<Symbol>) -> Self {
        self.tradable_symbols = Some(symbols);
        self
    }

    pub fn validate(&self, order: &Order) -> Vec<ValidationFailure> {
        let mut failures: Vec<ValidationFailure> = self
            .rules
            .iter()
            .filter_map(|rule| rule(order).err())
            .collect();

        if let Some(symbols) = &self.tradable_symbols {
            if !symbols.contains(&order.symbol) {
                failures.push(ValidationFailure::new(
                    "tradable_symbol",
                    format!("{} is not in the tradable symbol list", order.symbol),
                ));
            }
        }
        failures
    }

    pub fn is_valid(&self, order: &Order) -> bool {
        self.validate(order).is_empty()
    }
}

impl Default for OrderValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qx_types::orders::Side;
    use rust_decimal_macros::dec;

    fn sym() -> Symbol {
        Symbol::equity("AAPL")
    }

    #[test]
    fn rejects_non_positive_quantity() {
        let order = Order::market(sym(), Side::Buy, Decimal::ZERO, "s");
        let validator = OrderValidator::new();
        assert!(!validator.is_valid(&order));
    }

    #[test]
    fn rejects_fractional_equity_quantity() {
        let order = Order::market(sym(), Side::Buy, dec!(1.5), "s");
        let validator = OrderValidator::new();
        assert!(!validator.is_valid(&order));
    }

    #[test]
    fn allows_fractional_crypto_quantity() {
        let order = Order::market(Symbol::crypto("BTCUSDT"), Side::Buy, dec!(1.5), "s");
        let validator = OrderValidator::new();
        assert!(validator.is_valid(&order));
    }

    #[test]
    fn tradable_symbol_allow_list_rejects_unknown_symbol() {
        let validator = OrderValidator::new().with_tradable_symbols(vec![Symbol::equity("MSFT")]);
        let order = Order::market(sym(), Side::Buy, dec!(1), "s");
        assert!(!validator.is_valid(&order));
    }

    #[test]
    fn rejects_empty_symbol() {
        let mut order = Order::market(sym(), Side::Buy, dec!(1), "s");
        order.symbol.symbol.clear();
        let validator = OrderValidator::new();
        assert!(!validator.is_valid(&order));
    }
}
