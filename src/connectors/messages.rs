// src/connectors/messages.rs
use crate::error::ChaserError;
use crate::types::{Fill, OpenOrder, Trade};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Server-issued info code asking the client to reconnect.
const RECONNECT_CODE: i64 = 20001;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Orderbook,
    Trades,
    Ticker,
    Fills,
    Orders,
}

/// Outbound control frames. Serialized shape matches the exchange protocol:
/// `{"op": "subscribe", "channel": "orderbook", "market": "BTC/USD"}`.
#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum WsRequest {
    Subscribe {
        channel: Channel,
        #[serde(skip_serializing_if = "Option::is_none")]
        market: Option<String>,
    },
    Unsubscribe {
        channel: Channel,
        #[serde(skip_serializing_if = "Option::is_none")]
        market: Option<String>,
    },
    Login {
        args: LoginArgs,
    },
}

#[derive(Debug, Serialize)]
pub struct LoginArgs {
    pub key: String,
    pub sign: String,
    pub time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subaccount: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookAction {
    Partial,
    Update,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookData {
    pub action: BookAction,
    pub bids: Vec<(Decimal, Decimal)>,
    pub asks: Vec<(Decimal, Decimal)>,
    pub checksum: u32,
    pub time: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TickerData {
    pub bid: Decimal,
    pub ask: Decimal,
    #[serde(rename = "bidSize")]
    pub bid_size: Decimal,
    #[serde(rename = "askSize")]
    pub ask_size: Decimal,
    pub last: Decimal,
    pub time: f64,
}

/// Every inbound frame, decoded exactly once at the protocol boundary.
#[derive(Debug)]
pub enum InboundEvent {
    /// subscribed/unsubscribed acks and info frames without side effects
    Ack,
    /// info frame carrying the server's reconnect-request code
    Reconnect,
    Error { code: Option<i64>, msg: String },
    Orderbook { market: String, data: BookData },
    Trades { market: String, trades: Vec<Trade> },
    Ticker { market: String, data: TickerData },
    Fill(Fill),
    Order(OpenOrder),
}

// Raw envelope; `data` stays untyped until the channel is known.
#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    frame_type: String,
    channel: Option<Channel>,
    market: Option<String>,
    code: Option<i64>,
    msg: Option<String>,
    data: Option<serde_json::Value>,
}

pub fn decode(raw: &str) -> Result<InboundEvent, ChaserError> {
    let frame: RawFrame =
        serde_json::from_str(raw).map_err(|e| ChaserError::Protocol(e.to_string()))?;
    match frame.frame_type.as_str() {
        "subscribed" | "unsubscribed" | "pong" => Ok(InboundEvent::Ack),
        "info" => {
            if frame.code == Some(RECONNECT_CODE) {
                Ok(InboundEvent::Reconnect)
            } else {
                Ok(InboundEvent::Ack)
            }
        }
        "error" => Ok(InboundEvent::Error {
            code: frame.code,
            msg: frame.msg.unwrap_or_default(),
        }),
        "partial" | "update" => {
            let channel = frame
                .channel
                .ok_or_else(|| ChaserError::Protocol("frame without channel".into()))?;
            let data = frame
                .data
                .ok_or_else(|| ChaserError::Protocol("frame without data".into()))?;
            let market = frame.market;
            let need_market = || {
                market
                    .clone()
                    .ok_or_else(|| ChaserError::Protocol("frame without market".into()))
            };
            match channel {
                Channel::Orderbook => Ok(InboundEvent::Orderbook {
                    market: need_market()?,
                    data: serde_json::from_value(data)
                        .map_err(|e| ChaserError::Protocol(e.to_string()))?,
                }),
                Channel::Trades => Ok(InboundEvent::Trades {
                    market: need_market()?,
                    trades: serde_json::from_value(data)
                        .map_err(|e| ChaserError::Protocol(e.to_string()))?,
                }),
                Channel::Ticker => Ok(InboundEvent::Ticker {
                    market: need_market()?,
                    data: serde_json::from_value(data)
                        .map_err(|e| ChaserError::Protocol(e.to_string()))?,
                }),
                Channel::Fills => Ok(InboundEvent::Fill(
                    serde_json::from_value(data)
                        .map_err(|e| ChaserError::Protocol(e.to_string()))?,
                )),
                Channel::Orders => Ok(InboundEvent::Order(
                    serde_json::from_value(data)
                        .map_err(|e| ChaserError::Protocol(e.to_string()))?,
                )),
            }
        }
        other => Err(ChaserError::Protocol(format!("unknown frame type {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OrderStatus, Side};
    use rust_decimal_macros::dec;

    #[test]
    fn subscribe_serializes_to_protocol_shape() {
        let req = WsRequest::Subscribe {
            channel: Channel::Orderbook,
            market: Some("BTC/USD".into()),
        };
        assert_eq!(
            serde_json::to_string(&req).unwrap(),
            r#"{"op":"subscribe","channel":"orderbook","market":"BTC/USD"}"#
        );
    }

    #[test]
    fn decodes_orderbook_partial() {
        let raw = r#"{"type":"partial","channel":"orderbook","market":"BTC/USD",
            "data":{"action":"partial","bids":[[100.5,2.0]],"asks":[[101.0,1.0]],
                    "checksum":12345,"time":1660000000.1}}"#;
        match decode(raw).unwrap() {
            InboundEvent::Orderbook { market, data } => {
                assert_eq!(market, "BTC/USD");
                assert_eq!(data.action, BookAction::Partial);
                assert_eq!(data.bids, vec![(dec!(100.5), dec!(2.0))]);
                assert_eq!(data.checksum, 12345);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn decodes_order_update() {
        let raw = r#"{"type":"update","channel":"orders","data":
            {"id":42,"market":"ETH-PERP","side":"sell","price":1800.5,
             "size":2.0,"filledSize":0.5,"status":"open"}}"#;
        match decode(raw).unwrap() {
            InboundEvent::Order(order) => {
                assert_eq!(order.id, 42);
                assert_eq!(order.side, Side::Sell);
                assert_eq!(order.status, OrderStatus::Open);
                assert_eq!(order.filled_size, dec!(0.5));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn info_reconnect_code_maps_to_reconnect() {
        let raw = r#"{"type":"info","code":20001}"#;
        assert!(matches!(decode(raw).unwrap(), InboundEvent::Reconnect));
        let raw = r#"{"type":"info","code":1}"#;
        assert!(matches!(decode(raw).unwrap(), InboundEvent::Ack));
    }

    #[test]
    fn error_frame_surfaces_message() {
        let raw = r#"{"type":"error","code":400,"msg":"Invalid login credentials"}"#;
        match decode(raw).unwrap() {
            InboundEvent::Error { code, msg } => {
                assert_eq!(code, Some(400));
                assert_eq!(msg, "Invalid login credentials");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn garbage_is_a_protocol_error() {
        assert!(decode("not json").is_err());
        assert!(decode(r#"{"type":"update"}"#).is_err());
    }
}
