//! Core domain types for the Clotho market-making engine.
//!
//! This crate provides the vocabulary shared by every other crate:
//! - `CurrencyPair`: base/counter symbols and the exchange symbol format
//! - `Price`, `Size`: precision-safe numeric types
//! - `LimitOrder`, `OrderSide`, `OrderClass`, `OrderPlacementParams`: order model
//! - `PositionSnapshot`, `Ticker`, `TradeRecord`, `WalletBalance`: exchange-owned records

pub mod decimal;
pub mod error;
pub mod order;
pub mod pair;
pub mod types;

pub use decimal::{Price, Size};
pub use error::{CoreError, Result};
pub use order::{
    ClientOrderId, ExpiryPolicy, LimitOrder, OrderClass, OrderPlacementParams, OrderSide,
    TriggerReference,
};
pub use pair::CurrencyPair;
pub use types::{PositionSnapshot, Ticker, TradeRecord, WalletBalance};
