use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::app_error::AppError;
use crate::socket::events::PriceSample;
use crate::socket::fallback_poller::PriceFetcher;
use crate::time_util;
use crate::trading::model::position::MarketType;
use crate::trading::okx::okx_client::OkxClient;
use crate::trading::okx::OkxApiResponse;

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct MarkPriceData {
    pub inst_type: String,
    pub inst_id: String,
    pub mark_px: String,
    pub ts: String,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct TickersData {
    pub inst_type: String,
    pub inst_id: String,
    pub last: String,
    #[serde(default)]
    pub ask_px: String,
    #[serde(default)]
    pub bid_px: String,
    pub ts: String,
}

pub type MarkPriceResponse = OkxApiResponse<Vec<MarkPriceData>>;
pub type TickersResponse = OkxApiResponse<Vec<TickersData>>;

/// 行情 REST 接口，websocket 不健康时由轮询器使用
pub struct OkxMarketApi {
    client: Arc<OkxClient>,
}

impl OkxMarketApi {
    pub fn new(client: Arc<OkxClient>) -> Self {
        Self { client }
    }

    /// GET /api/v5/public/mark-price
    pub async fn get_mark_price(&self, inst_id: &str) -> Result<Option<MarkPriceData>, AppError> {
        let path = format!(
            "/api/v5/public/mark-price?instType={}&instId={}",
            derivative_inst_type(inst_id),
            inst_id
        );
        let res: MarkPriceResponse = self.client.get_public(&path).await?;
        Ok(res.into_data()?.into_iter().next())
    }

    /// GET /api/v5/market/ticker
    pub async fn get_ticker(&self, inst_id: &str) -> Result<Option<TickersData>, AppError> {
        let path = format!("/api/v5/market/ticker?instId={}", inst_id);
        let res: TickersResponse = self.client.get_public(&path).await?;
        Ok(res.into_data()?.into_iter().next())
    }
}

/// 衍生品的 instType：永续合约以 `-SWAP` 结尾，其余按交割合约处理（如 BTC-USDT-250328）
pub fn derivative_inst_type(inst_id: &str) -> &'static str {
    if inst_id.ends_with("-SWAP") {
        "SWAP"
    } else {
        "FUTURES"
    }
}

fn to_sample(inst_id: String, raw_price: &str, raw_ts: &str) -> anyhow::Result<PriceSample> {
    let price = raw_price
        .parse::<f64>()
        .ok()
        .filter(|p| p.is_finite() && *p > 0.0)
        .ok_or_else(|| anyhow::anyhow!("{} 价格无法解析: {}", inst_id, raw_price))?;
    let ts = raw_ts
        .parse::<i64>()
        .ok()
        .and_then(time_util::millis_to_datetime)
        .unwrap_or_else(Utc::now);
    Ok(PriceSample::new(inst_id, price, ts))
}

#[async_trait]
impl PriceFetcher for OkxMarketApi {
    async fn fetch_price(
        &self,
        market: MarketType,
        symbol: &str,
    ) -> anyhow::Result<Option<PriceSample>> {
        match market {
            MarketType::Swap => match self.get_mark_price(symbol).await? {
                Some(data) => Ok(Some(to_sample(data.inst_id, &data.mark_px, &data.ts)?)),
                None => Ok(None),
            },
            MarketType::Spot => match self.get_ticker(symbol).await? {
                Some(data) => Ok(Some(to_sample(data.inst_id, &data.last, &data.ts)?)),
                None => Ok(None),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_price_response() {
        let body = r#"{"code":"0","msg":"","data":[{"instType":"SWAP","instId":"BTC-USDT-SWAP","markPx":"200","ts":"1597026383085"}]}"#;
        let res: MarkPriceResponse = serde_json::from_str(body).unwrap();
        let data = res.into_data().unwrap().remove(0);
        let sample = to_sample(data.inst_id, &data.mark_px, &data.ts).unwrap();
        assert_eq!(sample.price, 200.0);
        assert_eq!(sample.ts.timestamp_millis(), 1597026383085);
    }

    #[test]
    fn test_derivative_inst_type() {
        assert_eq!(derivative_inst_type("BTC-USDT-SWAP"), "SWAP");
        assert_eq!(derivative_inst_type("BTC-USDT-250328"), "FUTURES");
        assert_eq!(derivative_inst_type("ETH-USD-241227"), "FUTURES");
    }

    #[test]
    fn test_bad_price_is_rejected() {
        assert!(to_sample("BTC-USDT".to_string(), "", "1").is_err());
        assert!(to_sample("BTC-USDT".to_string(), "-1", "1").is_err());
    }
}
