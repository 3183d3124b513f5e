//! Realtime frame formats.
//!
//! Inbound frames are classified once, by the `error` marker first and the
//! `table` name second, into a typed [`Frame`].

use clotho_core::{PositionSnapshot, TradeRecord};
use clotho_exchange::wire::{RawPosition, RawTrade};
use serde::Serialize;
use serde_json::Value;

use crate::error::{WsError, WsResult};

/// Decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Trade(Vec<TradeRecord>),
    Position(Vec<PositionSnapshot>),
    /// Exchange reported an error; the session must close.
    Error(String),
    /// Welcome banner, subscription acks, other tables.
    Unknown(Value),
}

/// Classifies one text frame.
///
/// Returns `Err(WsError::Protocol)` for text that is not JSON or a known
/// table whose rows do not decode.
pub fn decode_frame(text: &str) -> WsResult<Frame> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| WsError::Protocol(format!("not JSON: {e}")))?;

    if let Some(error) = value.get("error") {
        let message = match error {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        return Ok(Frame::Error(message));
    }

    match value.get("table").and_then(Value::as_str) {
        Some("trade") => {
            let rows: Vec<RawTrade> = decode_rows(&value)?;
            let trades = rows
                .into_iter()
                .map(|r| r.into_record().map_err(|e| WsError::Protocol(e.to_string())))
                .collect::<WsResult<Vec<_>>>()?;
            Ok(Frame::Trade(trades))
        }
        Some("position") => {
            let rows: Vec<RawPosition> = decode_rows(&value)?;
            Ok(Frame::Position(
                rows.into_iter().filter_map(RawPosition::into_snapshot).collect(),
            ))
        }
        _ => Ok(Frame::Unknown(value)),
    }
}

fn decode_rows<T: serde::de::DeserializeOwned>(value: &Value) -> WsResult<Vec<T>> {
    let data = value.get("data").cloned().unwrap_or(Value::Array(Vec::new()));
    serde_json::from_value(data).map_err(|e| WsError::Protocol(format!("bad table rows: {e}")))
}

/// Outbound `{"op": ..., "args": [...]}` frame.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OutboundFrame {
    pub op: String,
    pub args: Vec<Value>,
}

impl OutboundFrame {
    pub fn auth(api_key: &str, expires: u64, signature: &str) -> Self {
        Self {
            op: "authKeyExpires".to_string(),
            args: vec![
                Value::from(api_key),
                Value::from(expires),
                Value::from(signature),
            ],
        }
    }

    pub fn subscribe<I, S>(channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            op: "subscribe".to_string(),
            args: channels.into_iter().map(|c| Value::String(c.into())).collect(),
        }
    }

    pub fn to_text(&self) -> WsResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clotho_core::{OrderSide, Price, Size};
    use rust_decimal_macros::dec;

    #[test]
    fn test_decode_trade_frame_in_order() {
        let text = r#"{"table":"trade","action":"insert","data":[
            {"timestamp":"2020-01-01T00:00:00.000Z","symbol":"XBTUSD","side":"Buy","size":10,"price":7200.5},
            {"timestamp":"2020-01-01T00:00:01.000Z","symbol":"XBTUSD","side":"Sell","size":5,"price":7199}
        ]}"#;
        let Frame::Trade(trades) = decode_frame(text).unwrap() else {
            panic!("expected trade frame");
        };
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].price, Price::new(dec!(7200.5)));
        assert_eq!(trades[0].side, OrderSide::Bid);
        assert_eq!(trades[1].size, Size::new(dec!(5)));
        assert_eq!(trades[1].side, OrderSide::Ask);
    }

    #[test]
    fn test_decode_position_frame_skips_partial_rows() {
        let text = r#"{"table":"position","action":"update","data":[
            {"symbol":"XBTUSD","currentQty":100,"avgEntryPrice":7000,"unrealisedRoePcnt":0.01},
            {"symbol":"XBTUSD","currentQty":100}
        ]}"#;
        let Frame::Position(positions) = decode_frame(text).unwrap() else {
            panic!("expected position frame");
        };
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].current_qty, Size::new(dec!(100)));
    }

    #[test]
    fn test_decode_error_frame() {
        let frame = decode_frame(r#"{"status":401,"error":"Signature not valid.","meta":{}}"#)
            .unwrap();
        assert_eq!(frame, Frame::Error("Signature not valid.".to_string()));
    }

    #[test]
    fn test_decode_unknown_and_acks() {
        assert!(matches!(
            decode_frame(r#"{"info":"Welcome to the BitMEX Realtime API."}"#).unwrap(),
            Frame::Unknown(_)
        ));
        assert!(matches!(
            decode_frame(r#"{"success":true,"subscribe":"trade:XBTUSD"}"#).unwrap(),
            Frame::Unknown(_)
        ));
        assert!(matches!(
            decode_frame(r#"{"table":"instrument","data":[]}"#).unwrap(),
            Frame::Unknown(_)
        ));
    }

    #[test]
    fn test_decode_malformed_is_protocol_error() {
        assert!(matches!(decode_frame("not json"), Err(WsError::Protocol(_))));
        assert!(matches!(
            decode_frame(r#"{"table":"trade","data":[{"symbol":"XBTUSD"}]}"#),
            Err(WsError::Protocol(_))
        ));
    }

    #[test]
    fn test_outbound_frames() {
        let auth = OutboundFrame::auth("key", 1518064236, "abc");
        assert_eq!(
            auth.to_text().unwrap(),
            r#"{"op":"authKeyExpires","args":["key",1518064236,"abc"]}"#
        );
        let sub = OutboundFrame::subscribe(["position:XBTUSD", "trade:XBTUSD"]);
        assert_eq!(
            sub.to_text().unwrap(),
            r#"{"op":"subscribe","args":["position:XBTUSD","trade:XBTUSD"]}"#
        );
    }
}
