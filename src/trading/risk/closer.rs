use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::trading::model::position::{GuardedPosition, MarketType};
use crate::trading::okx::trade::{ClosePositionRequest, OkxTradeApi, OrdType, OrderRequest, PosMode, TdMode};
use crate::trading::risk::store::PositionStore;
use crate::trading::risk::types::CloseReason;

/// 平仓执行方，风控只决定何时平仓
#[async_trait]
pub trait PositionCloser: Send + Sync {
    async fn close(&self, position: &GuardedPosition, reason: CloseReason) -> anyhow::Result<()>;
}

/// 通过 OKX 市价平仓，成交后把持仓标记为已平仓
pub struct OkxPositionCloser {
    trade_api: OkxTradeApi,
    store: Arc<dyn PositionStore>,
    margin_mode: String,
    pos_mode: PosMode,
}

impl OkxPositionCloser {
    pub fn new(
        trade_api: OkxTradeApi,
        store: Arc<dyn PositionStore>,
        margin_mode: String,
        pos_mode: PosMode,
    ) -> Self {
        Self {
            trade_api,
            store,
            margin_mode,
            pos_mode,
        }
    }
}

/// 衍生品市价全平
pub fn close_position_request(
    position: &GuardedPosition,
    margin_mode: &str,
    pos_mode: PosMode,
) -> ClosePositionRequest {
    ClosePositionRequest {
        inst_id: position.symbol.clone(),
        pos_side: Some(pos_mode.close_pos_side(position.side)),
        mgn_mode: TdMode::margin(margin_mode).to_string(),
        auto_cxl: true,
    }
}

#[async_trait]
impl PositionCloser for OkxPositionCloser {
    async fn close(&self, position: &GuardedPosition, reason: CloseReason) -> anyhow::Result<()> {
        match position.market {
            MarketType::Swap => {
                let req = close_position_request(position, &self.margin_mode, self.pos_mode);
                self.trade_api
                    .close_position(&req)
                    .await
                    .with_context(|| format!("OKX 平仓失败 id={} {}", position.id, position.symbol))?;
            }
            MarketType::Spot => {
                let req = OrderRequest {
                    inst_id: position.symbol.clone(),
                    td_mode: TdMode::Cash.to_string(),
                    side: position.side.close_order_side().to_string(),
                    ord_type: OrdType::Market.to_string(),
                    sz: position.quantity.to_string(),
                    tgt_ccy: Some("base_ccy".to_string()),
                };
                self.trade_api
                    .place_order(&req)
                    .await
                    .with_context(|| format!("OKX 现货市价单失败 id={} {}", position.id, position.symbol))?;
            }
        }
        info!(
            "✅ OKX 平仓成功 id={} symbol={} reason={}",
            position.id, position.symbol, reason
        );

        self.store
            .mark_closed(position.id, reason, position.last_price)
            .await
            .with_context(|| format!("持仓 {} 已在交易所平仓，但写库失败", position.id))
    }
}

/// 只打日志，不下单也不写库
pub struct DryRunCloser;

#[async_trait]
impl PositionCloser for DryRunCloser {
    async fn close(&self, position: &GuardedPosition, reason: CloseReason) -> anyhow::Result<()> {
        warn!(
            "[dry-run] 平仓 id={} symbol={} side={} qty={} reason={} price={:?}",
            position.id,
            position.symbol,
            position.side.as_str(),
            position.quantity,
            reason,
            position.last_price
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading::model::position::PositionSide;
    use chrono::Utc;

    fn short_swap() -> GuardedPosition {
        GuardedPosition::new(5, "BTC-USDT-SWAP", MarketType::Swap, PositionSide::Short, 100.0, 2.0, Utc::now())
            .unwrap()
    }

    #[test]
    fn test_close_request_follows_pos_mode() {
        let req = close_position_request(&short_swap(), "cross", PosMode::LongShort);
        assert_eq!(req.pos_side.as_deref(), Some("short"));
        assert_eq!(req.mgn_mode, "cross");

        let req = close_position_request(&short_swap(), "isolated", PosMode::Net);
        assert_eq!(
            serde_json::to_string(&req).unwrap(),
            r#"{"instId":"BTC-USDT-SWAP","posSide":"net","mgnMode":"isolated","autoCxl":true}"#
        );
    }
}
