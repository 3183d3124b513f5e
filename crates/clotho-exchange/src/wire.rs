//! Exchange wire format: response DTOs and the order-placement form.

use chrono::{DateTime, Utc};
use clotho_core::{
    ClientOrderId, LimitOrder, OrderClass, OrderPlacementParams, OrderSide, PositionSnapshot,
    Price, Size, Ticker, TradeRecord, WalletBalance,
};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::{ApiError, ApiResult};

const PARTICIPATE_DO_NOT_INITIATE: &str = "ParticipateDoNotInitiate";
const CLOSE: &str = "Close";
const REDUCE_ONLY: &str = "ReduceOnly";

/// Error body: `{"error": {"message": "...", "name": "..."}}`.
#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorInfo,
}

#[derive(Debug, Deserialize)]
pub struct ErrorInfo {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl ErrorBody {
    /// Decodes an error response, falling back to the raw body text.
    pub fn into_api_error(status: u16, body: &str) -> ApiError {
        match serde_json::from_str::<ErrorBody>(body) {
            Ok(parsed) => ApiError::Exchange {
                status,
                name: parsed.error.name.unwrap_or_default(),
                message: parsed.error.message.unwrap_or_default(),
            },
            Err(_) => ApiError::Exchange {
                status,
                name: "HTTPError".to_string(),
                message: body.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOrder {
    #[serde(rename = "orderID")]
    pub order_id: Option<String>,
    #[serde(rename = "clOrdID", default)]
    pub cl_ord_id: Option<String>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub side: Option<String>,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub order_qty: Option<Decimal>,
    #[serde(default)]
    pub stop_px: Option<Decimal>,
    #[serde(default)]
    pub ord_type: Option<String>,
    #[serde(default)]
    pub ord_status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPosition {
    pub symbol: String,
    #[serde(default)]
    pub avg_entry_price: Option<Decimal>,
    #[serde(default)]
    pub current_qty: Option<Decimal>,
    #[serde(default)]
    pub unrealised_roe_pcnt: Option<Decimal>,
}

impl RawPosition {
    /// Positions without an entry price (flat or partial updates) are skipped.
    pub fn into_snapshot(self) -> Option<PositionSnapshot> {
        Some(PositionSnapshot {
            symbol: self.symbol,
            avg_entry_price: Price::new(self.avg_entry_price?),
            current_qty: Size::new(self.current_qty.unwrap_or_default()),
            unrealised_roe_pcnt: self.unrealised_roe_pcnt.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMargin {
    pub currency: String,
    #[serde(default)]
    pub wallet_balance: Decimal,
    #[serde(default)]
    pub available_margin: Decimal,
}

impl From<RawMargin> for WalletBalance {
    fn from(raw: RawMargin) -> Self {
        Self {
            currency: raw.currency,
            wallet_balance: raw.wallet_balance,
            available_margin: raw.available_margin,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawInstrument {
    pub symbol: String,
    #[serde(default)]
    pub last_price: Option<Decimal>,
}

impl RawInstrument {
    pub fn into_ticker(self) -> ApiResult<Ticker> {
        let last_price = self
            .last_price
            .ok_or_else(|| ApiError::Protocol(format!("instrument {} has no lastPrice", self.symbol)))?;
        Ok(Ticker {
            symbol: self.symbol,
            last_price: Price::new(last_price),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawBookLevel {
    pub side: String,
    pub size: Decimal,
    pub price: Decimal,
}

impl RawBookLevel {
    pub fn side(&self) -> OrderSide {
        if self.side.eq_ignore_ascii_case("Sell") {
            OrderSide::Ask
        } else {
            OrderSide::Bid
        }
    }
}

/// Trade record as carried by the `trade` table.
#[derive(Debug, Clone, Deserialize)]
pub struct RawTrade {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub side: String,
    #[serde(default)]
    pub size: Decimal,
    pub price: Decimal,
}

impl RawTrade {
    pub fn into_record(self) -> ApiResult<TradeRecord> {
        let side = OrderSide::from_wire(&self.side).map_err(|e| ApiError::Protocol(e.to_string()))?;
        Ok(TradeRecord {
            symbol: self.symbol,
            side,
            price: Price::new(self.price),
            size: Size::new(self.size),
            timestamp: self.timestamp,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlacedOrderResponse {
    #[serde(rename = "orderID")]
    pub order_id: Option<String>,
}

/// Form fields for `POST order`, derived from an order intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderForm {
    pub symbol: String,
    pub side: &'static str,
    pub order_qty: Option<i64>,
    pub price: Option<Decimal>,
    pub stop_px: Option<Decimal>,
    pub peg_offset_value: Option<Decimal>,
    pub ord_type: &'static str,
    pub exec_inst: String,
    pub display_qty: Option<Decimal>,
    pub time_in_force: &'static str,
    pub text: Option<String>,
    pub cl_ord_id: String,
}

impl OrderForm {
    /// Applies the exchange's placement rules:
    /// price-less classes drop the limit price, `execInst` flags are joined in
    /// fixed order, pegged orders go out as `Stop` with a side-signed offset,
    /// and `hidden` selects the display quantity.
    pub fn derive(
        order: &LimitOrder,
        class: OrderClass,
        params: &OrderPlacementParams,
        cl_ord_id: &ClientOrderId,
    ) -> Self {
        let mut price = order.price.map(|p| p.inner());
        let mut ord_type = class.wire_name();
        let mut peg_offset_value = params.peg_offset.map(|p| p.inner());

        if class.omits_price() {
            price = None;
        }

        let mut flags: Vec<&str> = Vec::new();
        if params.post_only {
            flags.push(PARTICIPATE_DO_NOT_INITIATE);
        }
        if params.close_on_trigger {
            flags.push(CLOSE);
        }
        if let Some(trigger) = params.trigger {
            if trigger != clotho_core::TriggerReference::MarkPrice {
                flags.push(trigger.wire_name());
            }
        }
        if params.reduce_only {
            flags.push(REDUCE_ONLY);
        }

        if class == OrderClass::Pegged {
            ord_type = OrderClass::Stop.wire_name();
            price = None;
            if order.side == OrderSide::Ask {
                peg_offset_value = peg_offset_value.map(|v| -v);
            }
        }

        let display_qty = match params.hidden {
            Some(true) => Some(params.iceberg_qty.map(|q| q.inner()).unwrap_or(Decimal::ZERO)),
            Some(false) => params.iceberg_qty.map(|q| q.inner()),
            None => None,
        };

        Self {
            symbol: order.pair.symbol(),
            side: order.side.wire_name(),
            order_qty: order.amount.map(|a| a.contracts()),
            price,
            stop_px: order.trigger_price.map(|p| p.inner()),
            peg_offset_value,
            ord_type,
            exec_inst: flags.join(","),
            display_qty,
            time_in_force: params.expiry.wire_name(),
            text: params.text.clone(),
            cl_ord_id: cl_ord_id.to_string(),
        }
    }

    /// Ordered `(name, value)` pairs, absent fields skipped.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("symbol", self.symbol.clone()),
            ("side", self.side.to_string()),
        ];
        if let Some(qty) = self.order_qty {
            fields.push(("orderQty", qty.to_string()));
        }
        if let Some(price) = self.price {
            fields.push(("price", price.normalize().to_string()));
        }
        if let Some(stop_px) = self.stop_px {
            fields.push(("stopPx", stop_px.normalize().to_string()));
        }
        if let Some(peg) = self.peg_offset_value {
            fields.push(("pegOffsetValue", peg.normalize().to_string()));
        }
        fields.push(("ordType", self.ord_type.to_string()));
        if !self.exec_inst.is_empty() {
            fields.push(("execInst", self.exec_inst.clone()));
        }
        if let Some(display) = self.display_qty {
            fields.push(("displayQty", display.normalize().to_string()));
        }
        fields.push(("timeInForce", self.time_in_force.to_string()));
        if let Some(text) = &self.text {
            fields.push(("text", text.clone()));
        }
        fields.push(("clOrdID", self.cl_ord_id.clone()));
        fields
    }
}

/// `application/x-www-form-urlencoded` body (also used for query strings).
pub fn encode_pairs<K: AsRef<str>, V: AsRef<str>>(pairs: &[(K, V)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| {
            format!(
                "{}={}",
                urlencoding::encode(k.as_ref()),
                urlencoding::encode(v.as_ref())
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}
