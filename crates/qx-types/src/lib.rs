pub mod errors;
pub mod event;
pub mod market;
pub mod orders;
pub mod portfolio;

pub use errors::{EventError, OrderBuildError};
pub use event::{Event, EventKind};
pub use market::{AssetClass, Bar, MarketDepth, MarketEvent, Resolution, Symbol, Tick, TickType};
pub use orders::{Fill, Order, OrderId, OrderStatus, OrderType, Side};
pub use portfolio::{Account, DailyPnL, EngineStateSnapshot, Position, RiskLimits, TradeRecord, TradeSide};
