//! Exchange-owned records consumed by the engine.

use crate::{OrderSide, Price, Size};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Latest traded price for an instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub last_price: Price,
}

/// Open position as reported by the exchange. Never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub symbol: String,
    pub avg_entry_price: Price,
    /// Signed contract quantity; negative means short.
    pub current_qty: Size,
    pub unrealised_roe_pcnt: Decimal,
}

impl PositionSnapshot {
    /// Side of the position (a flat position counts as long).
    pub fn side(&self) -> OrderSide {
        if self.current_qty.is_negative() {
            OrderSide::Ask
        } else {
            OrderSide::Bid
        }
    }

    pub fn is_flat(&self) -> bool {
        self.current_qty.is_zero()
    }
}

/// Margin wallet summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletBalance {
    pub currency: String,
    pub wallet_balance: Decimal,
    pub available_margin: Decimal,
}

/// Single public trade from the trade channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: String,
    pub side: OrderSide,
    pub price: Price,
    pub size: Size,
    pub timestamp: DateTime<Utc>,
}
