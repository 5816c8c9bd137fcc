use std::fmt::{Display, Formatter};
use std::sync::Arc;

use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::app_error::AppError;
use crate::trading::model::position::PositionSide;
use crate::trading::okx::okx_client::OkxClient;
use crate::trading::okx::OkxApiResponse;

pub enum OrdType {
    /// 市价单
    Market,
}

impl Display for OrdType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            OrdType::Market => write!(f, "market"),
        }
    }
}

pub enum TdMode {
    /// 保证金模式：isolated：逐仓
    Isolated,
    /// 保证金模式：cross：全仓
    Cross,
    /// 非保证金模式：cash：现货
    Cash,
}

impl Display for TdMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TdMode::Isolated => write!(f, "isolated"),
            TdMode::Cross => write!(f, "cross"),
            TdMode::Cash => write!(f, "cash"),
        }
    }
}

impl TdMode {
    /// 只认 isolated / cross，其余按逐仓处理
    pub fn margin(mode: &str) -> Self {
        if mode.eq_ignore_ascii_case("cross") {
            TdMode::Cross
        } else {
            TdMode::Isolated
        }
    }
}

/// 账户持仓模式（OKX posMode）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PosMode {
    /// long_short_mode：开平仓模式
    LongShort,
    /// net_mode：买卖模式
    Net,
}

impl PosMode {
    /// 只认 net_mode / net，其余按开平仓模式处理
    pub fn parse(mode: &str) -> Self {
        match mode.trim().to_ascii_lowercase().as_str() {
            "net_mode" | "net" => PosMode::Net,
            _ => PosMode::LongShort,
        }
    }

    /// 平仓请求里的 posSide：买卖模式下只能填 net
    pub fn close_pos_side(&self, side: PositionSide) -> String {
        match self {
            PosMode::LongShort => side.as_str().to_string(),
            PosMode::Net => "net".to_string(),
        }
    }
}

/// 市价全平请求
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ClosePositionRequest {
    pub inst_id: String,
    /// 持仓方向：开平仓模式下 long / short，买卖模式下 net
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pos_side: Option<String>,
    pub mgn_mode: String,
    /// 平仓时自动撤销挂单
    pub auto_cxl: bool,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ClosePositionData {
    pub inst_id: String,
    #[serde(default)]
    pub pos_side: String,
}

/// 下单请求（现货卖出 / 买回）
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    pub inst_id: String,
    pub td_mode: String,
    pub side: String,
    pub ord_type: String,
    pub sz: String,
    /// 现货市价单数量单位：base_ccy 表示按交易货币
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tgt_ccy: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponseData {
    #[serde(default)]
    pub ord_id: String,
    #[serde(default)]
    pub cl_ord_id: String,
    /// 事件执行结果的code，0代表成功
    pub s_code: String,
    #[serde(default)]
    pub s_msg: String,
}

pub type ClosePositionResponse = OkxApiResponse<Vec<ClosePositionData>>;
pub type OrderResponse = OkxApiResponse<Vec<OrderResponseData>>;

pub struct OkxTradeApi {
    client: Arc<OkxClient>,
}

impl OkxTradeApi {
    pub fn new(client: Arc<OkxClient>) -> Self {
        Self { client }
    }

    /// POST /api/v5/trade/close-position
    pub async fn close_position(
        &self,
        req: &ClosePositionRequest,
    ) -> Result<Vec<ClosePositionData>, AppError> {
        let path = "/api/v5/trade/close-position";
        let body = serde_json::to_string(req)?;
        debug!("close position request: {}", body);
        let res: ClosePositionResponse = self.client.send_signed(Method::POST, path, &body).await?;
        res.into_data()
    }

    /// POST /api/v5/trade/order
    pub async fn place_order(&self, req: &OrderRequest) -> Result<Vec<OrderResponseData>, AppError> {
        let path = "/api/v5/trade/order";
        let body = serde_json::to_string(req)?;
        debug!("place order request: {}", body);
        let res: OrderResponse = self.client.send_signed(Method::POST, path, &body).await?;
        let data = res.into_data()?;
        // 外层 code 为 0 时单笔订单仍可能失败
        if let Some(failed) = data.iter().find(|d| d.s_code != "0") {
            return Err(AppError::OkxApiError {
                code: failed.s_code.clone(),
                msg: failed.s_msg.clone(),
            });
        }
        Ok(data)
    }
}
