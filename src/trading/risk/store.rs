use async_trait::async_trait;

use crate::trading::model::position::{GuardedPosition, RiskStateUpdate};
use crate::trading::risk::types::CloseReason;

/// 持仓存储
///
/// 风控只读取未平仓持仓、回写簿记字段；平仓状态由平仓执行方在成交后写入。
#[async_trait]
pub trait PositionStore: Send + Sync {
    async fn load_open_positions(&self) -> anyhow::Result<Vec<GuardedPosition>>;

    async fn save_risk_state(&self, update: &RiskStateUpdate) -> anyhow::Result<()>;

    async fn mark_closed(
        &self,
        id: i64,
        reason: CloseReason,
        close_price: Option<f64>,
    ) -> anyhow::Result<()>;
}
