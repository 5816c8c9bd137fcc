//! OKX 公共 websocket 报文
//!
//! 推送示例（mark-price）：
//! `{"arg":{"channel":"mark-price","instId":"BTC-USDT-SWAP"},"data":[{"instType":"SWAP","instId":"BTC-USDT-SWAP","markPx":"42310.6","ts":"1630049139746"}]}`

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::socket::events::PriceSample;
use crate::time_util;
use crate::trading::model::position::MarketType;

#[derive(Error, Debug)]
pub enum MessageError {
    #[error("报文不是合法 JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{symbol} 价格字段 {field} 缺失")]
    MissingPrice { symbol: String, field: &'static str },

    #[error("{symbol} 价格无法解析: {raw}")]
    InvalidPrice { symbol: String, raw: String },

    #[error("频道不匹配: 期望 {expected}, 实际 {actual}")]
    UnexpectedChannel { expected: &'static str, actual: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsArg {
    pub channel: String,
    pub inst_id: String,
}

/// 订阅/取消订阅请求
#[derive(Debug, Serialize)]
pub struct WsRequest {
    pub op: &'static str,
    pub args: Vec<WsArg>,
}

impl WsRequest {
    pub fn subscribe(market: MarketType, symbols: &[String]) -> Self {
        Self::build("subscribe", market, symbols)
    }

    pub fn unsubscribe(market: MarketType, symbols: &[String]) -> Self {
        Self::build("unsubscribe", market, symbols)
    }

    fn build(op: &'static str, market: MarketType, symbols: &[String]) -> Self {
        Self {
            op,
            args: symbols
                .iter()
                .map(|s| WsArg {
                    channel: market.channel().to_string(),
                    inst_id: s.clone(),
                })
                .collect(),
        }
    }

    pub fn to_text(&self) -> Result<String, MessageError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsPriceData {
    pub inst_id: String,
    #[serde(default)]
    pub mark_px: Option<String>,
    #[serde(default)]
    pub last: Option<String>,
    #[serde(default)]
    pub ts: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WsPushMessage {
    pub arg: WsArg,
    pub data: Vec<WsPriceData>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsEventMessage {
    /// subscribe / unsubscribe / error
    pub event: String,
    #[serde(default)]
    pub arg: Option<WsArg>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub conn_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OkxWsMessage {
    Event(WsEventMessage),
    Push(WsPushMessage),
}

/// 解析后的一帧
#[derive(Debug)]
pub enum WsFrame {
    Pong,
    Prices(Vec<PriceSample>),
    Event(WsEventMessage),
}

/// 按市场类型从推送中取价格：衍生品取 markPx，现货取 last
pub fn parse_ws_text(text: &str, market: MarketType) -> Result<WsFrame, MessageError> {
    if text == "pong" {
        return Ok(WsFrame::Pong);
    }

    match serde_json::from_str::<OkxWsMessage>(text)? {
        OkxWsMessage::Event(event) => Ok(WsFrame::Event(event)),
        OkxWsMessage::Push(push) => {
            if push.arg.channel != market.channel() {
                return Err(MessageError::UnexpectedChannel {
                    expected: market.channel(),
                    actual: push.arg.channel,
                });
            }
            let mut samples = Vec::with_capacity(push.data.len());
            for data in push.data {
                samples.push(price_sample(data, market)?);
            }
            Ok(WsFrame::Prices(samples))
        }
    }
}

fn price_sample(data: WsPriceData, market: MarketType) -> Result<PriceSample, MessageError> {
    let (field, raw) = match market {
        MarketType::Swap => ("markPx", data.mark_px),
        MarketType::Spot => ("last", data.last),
    };
    let raw = raw.ok_or_else(|| MessageError::MissingPrice {
        symbol: data.inst_id.clone(),
        field,
    })?;
    let price = raw
        .parse::<f64>()
        .ok()
        .filter(|p| p.is_finite() && *p > 0.0)
        .ok_or_else(|| MessageError::InvalidPrice {
            symbol: data.inst_id.clone(),
            raw: raw.clone(),
        })?;
    let ts = data
        .ts
        .as_deref()
        .and_then(|ts| ts.parse::<i64>().ok())
        .and_then(time_util::millis_to_datetime)
        .unwrap_or_else(Utc::now);
    Ok(PriceSample::new(data.inst_id, price, ts))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mark_price_push() {
        let text = r#"{"arg":{"channel":"mark-price","instId":"BTC-USDT-SWAP"},"data":[{"instType":"SWAP","instId":"BTC-USDT-SWAP","markPx":"42310.6","ts":"1630049139746"}]}"#;
        match parse_ws_text(text, MarketType::Swap).unwrap() {
            WsFrame::Prices(samples) => {
                assert_eq!(samples.len(), 1);
                assert_eq!(samples[0].symbol, "BTC-USDT-SWAP");
                assert_eq!(samples[0].price, 42310.6);
                assert_eq!(samples[0].ts.timestamp_millis(), 1630049139746);
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_parse_spot_ticker_uses_last() {
        let text = r#"{"arg":{"channel":"tickers","instId":"BTC-USDT"},"data":[{"instType":"SPOT","instId":"BTC-USDT","last":"103807.9","askPx":"103808","bidPx":"103807.9","ts":"1747136969082"}]}"#;
        match parse_ws_text(text, MarketType::Spot).unwrap() {
            WsFrame::Prices(samples) => assert_eq!(samples[0].price, 103807.9),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_parse_event_and_pong() {
        let text = r#"{"event":"subscribe","arg":{"channel":"mark-price","instId":"ETH-USDT-SWAP"},"connId":"a4d3ae55"}"#;
        assert!(matches!(
            parse_ws_text(text, MarketType::Swap).unwrap(),
            WsFrame::Event(e) if e.event == "subscribe"
        ));
        let text = r#"{"event":"error","code":"60012","msg":"Invalid request","connId":"a4d3ae55"}"#;
        assert!(matches!(
            parse_ws_text(text, MarketType::Swap).unwrap(),
            WsFrame::Event(e) if e.code.as_deref() == Some("60012")
        ));
        assert!(matches!(parse_ws_text("pong", MarketType::Spot).unwrap(), WsFrame::Pong));
    }

    #[test]
    fn test_malformed_messages_are_errors() {
        assert!(matches!(
            parse_ws_text("{not json", MarketType::Swap),
            Err(MessageError::Json(_))
        ));
        let bad_px = r#"{"arg":{"channel":"mark-price","instId":"BTC-USDT-SWAP"},"data":[{"instId":"BTC-USDT-SWAP","markPx":"abc","ts":"1"}]}"#;
        assert!(matches!(
            parse_ws_text(bad_px, MarketType::Swap),
            Err(MessageError::InvalidPrice { .. })
        ));
        let wrong_channel = r#"{"arg":{"channel":"tickers","instId":"BTC-USDT"},"data":[{"instId":"BTC-USDT","last":"1"}]}"#;
        assert!(matches!(
            parse_ws_text(wrong_channel, MarketType::Swap),
            Err(MessageError::UnexpectedChannel { .. })
        ));
    }

    #[test]
    fn test_subscribe_request_shape() {
        let req = WsRequest::subscribe(MarketType::Swap, &["BTC-USDT-SWAP".to_string()]);
        assert_eq!(
            req.to_text().unwrap(),
            r#"{"op":"subscribe","args":[{"channel":"mark-price","instId":"BTC-USDT-SWAP"}]}"#
        );
    }
}
