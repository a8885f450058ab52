pub mod enums;
pub mod error;
pub mod structs;

// Re-export the core types to provide a clean public API.
pub use enums::{ExecutionStatus, OrderSide, OrderType};
pub use error::CoreError;
pub use structs::{
    DerivativeHolding, ExecutionReport, InstrumentInfo, LastPriceTick, MoneyBalance, Order,
    OrderBook, PositionSnapshot, SecurityHolding,
};
