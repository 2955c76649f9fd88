use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Financial symbol with exchange information.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol {
    pub symbol: String,
    pub exchange: String,
    pub asset_class: AssetClass,
}

impl Symbol {
    pub fn new(symbol: &str, exchange: &str, asset_class: AssetClass) -> Self {
        Self {
            symbol: symbol.to_string(),
            exchange: exchange.to_string(),
            asset_class,
        }
    }

    pub fn equity(symbol: &str) -> Self {
        Self::new(symbol, "NASDAQ", AssetClass::Equity)
    }

    pub fn crypto(symbol: &str) -> Self {
        Self::new(symbol, "BINANCE", AssetClass::Crypto)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.exchange, self.symbol)
    }
}

/// Asset classes supported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetClass {
    Equity,
    Crypto,
    Forex,
    Commodity,
    Bond,
}

impl AssetClass {
    pub fn is_24_7(&self) -> bool {
        matches!(self, AssetClass::Crypto)
    }

    pub fn supports_fractional_quantities(&self) -> bool {
        matches!(self, AssetClass::Crypto | AssetClass::Forex)
    }

    pub fn default_exchange(&self) -> &'static str {
        match self {
            AssetClass::Equity => "NASDAQ",
            AssetClass::Crypto => "BINANCE",
            AssetClass::Forex => "FOREX",
            AssetClass::Commodity => "CME",
            AssetClass::Bond => "NYSE",
        }
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AssetClass::Equity => "Equity",
            AssetClass::Crypto => "Crypto",
            AssetClass::Forex => "Forex",
            AssetClass::Commodity => "Commodity",
            AssetClass::Bond => "Bond",
        };
        write!(f, "{}", s)
    }
}

/// OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: Symbol,
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub resolution: Resolution,
}

impl Bar {
    pub fn typical_price(&self) -> Decimal {
        (self.high + self.low + self.close) / Decimal::from(3)
    }
}

/// Time resolution for bar data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resolution {
    Tick,
    Second,
    Minute,
    FiveMinute,
    FifteenMinute,
    Hour,
    FourHour,
    Day,
    Week,
    Month,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Resolution::Tick => "tick",
            Resolution::Second => "1s",
            Resolution::Minute => "1m",
            Resolution::FiveMinute => "5m",
            Resolution::FifteenMinute => "15m",
            Resolution::Hour => "1h",
            Resolution::FourHour => "4h",
            Resolution::Day => "1d",
            Resolution::Week => "1w",
            Resolution::Month => "1M",
        };
        write!(f, "{}", s)
    }
}

/// Subscription mode for the market data stream (C3). `Ltp` carries only last
/// traded price; `Full` additionally carries market depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubscriptionMode {
    Ltp,
    Quote,
    Full,
}

/// A single level of a market depth ladder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DepthLevel {
    pub price: Decimal,
    pub quantity: Decimal,
    pub orders: u32,
}

/// Market depth snapshot, only populated in `SubscriptionMode::Full`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketDepth {
    pub bids: Vec<DepthLevel>,
    pub asks: Vec<DepthLevel>,
}

/// Enriched tick republished by the market data stream (C3). The stream does
/// not resolve `instrument_token` to a human symbol — it passes through
/// whatever symbol reference the caller attached when subscribing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub instrument_token: u64,
    pub symbol: Symbol,
    pub timestamp: DateTime<Utc>,
    pub last_price: Decimal,
    pub volume: Decimal,
    pub best_bid_size: Option<Decimal>,
    pub best_ask_size: Option<Decimal>,
    pub ohlc: Option<Bar>,
    pub depth: Option<MarketDepth>,
    /// Raw venue payload, kept for debuggability; opaque to the core.
    pub raw: serde_json::Value,
}

/// Tick type distinguishing trades from quote updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TickType {
    Trade,
    BidQuote,
    AskQuote,
}

/// Market data payload carried by `Tick`/`Bar`/`MarketData` events on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MarketEvent {
    Bar(Bar),
    Tick(Tick),
    Quote {
        symbol: Symbol,
        timestamp: DateTime<Utc>,
        bid: Decimal,
        ask: Decimal,
        bid_size: Decimal,
        ask_size: Decimal,
    },
}

impl MarketEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            MarketEvent::Bar(bar) => bar.timestamp,
            MarketEvent::Tick(tick) => tick.timestamp,
            MarketEvent::Quote { timestamp, .. } => *timestamp,
        }
    }

    pub fn symbol(&self) -> &Symbol {
        match self {
            MarketEvent::Bar(bar) => &bar.symbol,
            MarketEvent::Tick(tick) => &tick.symbol,
            MarketEvent::Quote { symbol, .. } => symbol,
        }
    }

    pub fn price(&self) -> Decimal {
        match self {
            MarketEvent::Bar(bar) => bar.close,
            MarketEvent::Tick(tick) => tick.last_price,
            MarketEvent::Quote { bid, ask, .. } => (*bid + *ask) / Decimal::from(2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_class_is_24_7() {
        assert!(AssetClass::Crypto.is_24_7());
        assert!(!AssetClass::Equity.is_24_7());
    }

    #[test]
    fn asset_class_fractional() {
        assert!(AssetClass::Crypto.supports_fractional_quantities());
        assert!(!AssetClass::Equity.supports_fractional_quantities());
    }

    #[test]
    fn symbol_display() {
        let s = Symbol::equity("AAPL");
        assert_eq!(format!("{s}"), "NASDAQ:AAPL");
    }

    #[test]
    fn market_event_price_uses_mid_for_quote() {
        use rust_decimal_macros::dec;
        let event = MarketEvent::Quote {
            symbol: Symbol::equity("AAPL"),
            timestamp: Utc::now(),
            bid: dec!(100),
            ask: dec!(102),
            bid_size: dec!(10),
            ask_size: dec!(10),
        };
        assert_eq!(event.price(), dec!(101));
    }
}
