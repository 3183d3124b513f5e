//! Order model: sides, classes, placement flags and client order ids.

use crate::error::CoreError;
use crate::{CurrencyPair, Price, Size};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Book side. Declaration order is the tie-break priority for book traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Bid,
    Ask,
}

impl OrderSide {
    /// Returns the opposite side.
    pub fn opposite(&self) -> Self {
        match self {
            Self::Bid => Self::Ask,
            Self::Ask => Self::Bid,
        }
    }

    /// Exchange wire name (`Buy` / `Sell`).
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::Bid => "Buy",
            Self::Ask => "Sell",
        }
    }

    /// Parse the exchange wire name.
    pub fn from_wire(s: &str) -> Result<Self, CoreError> {
        match s {
            "Buy" => Ok(Self::Bid),
            "Sell" => Ok(Self::Ask),
            other => Err(CoreError::InvalidSide(other.to_string())),
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bid => write!(f, "BID"),
            Self::Ask => write!(f, "ASK"),
        }
    }
}

impl FromStr for OrderSide {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BID" | "BUY" => Ok(Self::Bid),
            "ASK" | "SELL" => Ok(Self::Ask),
            _ => Err(CoreError::InvalidSide(s.to_string())),
        }
    }
}

/// Exchange order types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderClass {
    Limit,
    Market,
    StopLimit,
    Stop,
    LimitIfTouched,
    MarketIfTouched,
    Pegged,
}

impl OrderClass {
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::Limit => "Limit",
            Self::Market => "Market",
            Self::StopLimit => "StopLimit",
            Self::Stop => "Stop",
            Self::LimitIfTouched => "LimitIfTouched",
            Self::MarketIfTouched => "MarketIfTouched",
            Self::Pegged => "Pegged",
        }
    }

    /// Classes that execute at market once triggered and carry no limit price.
    pub fn omits_price(&self) -> bool {
        matches!(self, Self::Market | Self::Stop | Self::MarketIfTouched)
    }
}

impl fmt::Display for OrderClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Expiry policy (time in force).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ExpiryPolicy {
    #[default]
    GoodTillCancel,
    ImmediateOrCancel,
    FillOrKill,
}

impl ExpiryPolicy {
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::GoodTillCancel => "GoodTillCancel",
            Self::ImmediateOrCancel => "ImmediateOrCancel",
            Self::FillOrKill => "FillOrKill",
        }
    }
}

/// Price reference used to fire conditional orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriggerReference {
    MarkPrice,
    LastPrice,
    IndexPrice,
}

impl TriggerReference {
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::MarkPrice => "MarkPrice",
            Self::LastPrice => "LastPrice",
            Self::IndexPrice => "IndexPrice",
        }
    }
}

/// Placement flags. Converted to exchange fields by the REST layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlacementParams {
    pub expiry: ExpiryPolicy,
    pub post_only: bool,
    pub reduce_only: bool,
    pub close_on_trigger: bool,
    pub trigger: Option<TriggerReference>,
    pub peg_offset: Option<Price>,
    pub iceberg_qty: Option<Size>,
    /// `Some(_)` requests a hidden/iceberg display quantity.
    pub hidden: Option<bool>,
    pub text: Option<String>,
}

impl OrderPlacementParams {
    /// Resting maker order that never takes liquidity.
    pub fn maker() -> Self {
        Self {
            post_only: true,
            ..Self::default()
        }
    }

    /// Stop order that closes on trigger, fired by the given reference.
    pub fn closing_stop(trigger: TriggerReference) -> Self {
        Self {
            close_on_trigger: true,
            trigger: Some(trigger),
            ..Self::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }
}

/// Order intent or order book level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitOrder {
    pub side: OrderSide,
    pub amount: Option<Size>,
    pub pair: CurrencyPair,
    pub price: Option<Price>,
    pub trigger_price: Option<Price>,
}

impl LimitOrder {
    pub fn new(side: OrderSide, amount: Size, pair: CurrencyPair, price: Price) -> Self {
        Self {
            side,
            amount: Some(amount),
            pair,
            price: Some(price),
            trigger_price: None,
        }
    }

    pub fn with_trigger(mut self, trigger_price: Price) -> Self {
        self.trigger_price = Some(trigger_price);
        self
    }

    /// Book traversal ordering: bids first (best bid first), then asks
    /// (best ask first).
    pub fn book_cmp(&self, other: &Self) -> Ordering {
        self.side.cmp(&other.side).then_with(|| {
            let by_price = self.price.cmp(&other.price);
            match self.side {
                OrderSide::Bid => by_price.reverse(),
                OrderSide::Ask => by_price,
            }
        })
    }
}

/// Client order id attached to every placement.
///
/// Format: `clotho_{timestamp_ms}_{uuid_short}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientOrderId(String);

impl ClientOrderId {
    pub fn new() -> Self {
        let ts = chrono::Utc::now().timestamp_millis();
        let uuid_short = &Uuid::new_v4().to_string()[..8];
        Self(format!("clotho_{ts}_{uuid_short}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ClientOrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ClientOrderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}
