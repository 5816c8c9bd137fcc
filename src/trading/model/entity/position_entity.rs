use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use rbatis::{crud, impl_select, RBatis};
use rbs::Value;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::time_util;
use crate::trading::model::position::{GuardedPosition, MarketType, PositionSide, RiskStateUpdate};
use crate::trading::risk::store::PositionStore;
use crate::trading::risk::types::CloseReason;

pub const STATUS_OPEN: &str = "open";
pub const STATUS_CLOSED: &str = "closed";

/// table: positions
///
/// 价格、百分比列使用 DOUBLE；`open_time` / `close_time` 为毫秒时间戳。
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "snake_case")]
pub struct PositionEntity {
    pub id: i64,
    pub inst_id: String,
    /// SWAP / FUTURES / SPOT
    pub inst_type: String,
    /// long / short
    pub pos_side: String,
    pub entry_price: f64,
    pub quantity: f64,
    pub leverage: Option<f64>,
    pub max_profit_pct: Option<f64>,
    pub max_profit_price: Option<f64>,
    pub trailing_stop_activated: Option<i32>,
    pub trailing_stop_price: Option<f64>,
    pub stop_loss_pct: Option<f64>,
    pub take_profit_pct: Option<f64>,
    pub strategy_id: Option<i64>,
    pub open_time: i64,
    pub status: String,
    pub close_reason: Option<String>,
    pub close_price: Option<f64>,
    pub close_time: Option<i64>,
}

crud!(PositionEntity {}, "positions");
impl_select!(PositionEntity{select_open() => "`where status = 'open'`"}, "positions");

impl TryFrom<PositionEntity> for GuardedPosition {
    type Error = anyhow::Error;

    fn try_from(entity: PositionEntity) -> Result<Self, Self::Error> {
        let market = entity.inst_type.parse::<MarketType>()?;
        let side = entity.pos_side.parse::<PositionSide>()?;
        let open_time = time_util::millis_to_datetime(entity.open_time)
            .ok_or_else(|| anyhow::anyhow!("open_time 无效: {}", entity.open_time))?;

        let mut position = GuardedPosition::new(
            entity.id,
            entity.inst_id,
            market,
            side,
            entity.entry_price,
            entity.quantity,
            open_time,
        )?;
        position.leverage = entity.leverage.unwrap_or(1.0);
        position.max_profit_pct = entity.max_profit_pct.unwrap_or(0.0);
        position.max_profit_price = entity.max_profit_price;
        position.trailing_stop_activated = entity.trailing_stop_activated.unwrap_or(0) == 1;
        position.trailing_stop_price = entity.trailing_stop_price;
        position.stop_loss_pct = entity.stop_loss_pct;
        position.take_profit_pct = entity.take_profit_pct;
        position.strategy_id = entity.strategy_id;
        Ok(position)
    }
}

fn opt_value(v: Option<f64>) -> Value {
    v.map(Value::from).unwrap_or(Value::Null)
}

pub struct PositionEntityModel {
    db: RBatis,
}

impl PositionEntityModel {
    pub fn new(db: RBatis) -> Self {
        Self { db }
    }

    pub async fn get_open_list(&self) -> anyhow::Result<Vec<PositionEntity>> {
        let data = PositionEntity::select_open(&self.db).await?;
        debug!("query open positions: {}", data.len());
        Ok(data)
    }
}

#[async_trait]
impl PositionStore for PositionEntityModel {
    async fn load_open_positions(&self) -> anyhow::Result<Vec<GuardedPosition>> {
        let rows = self.get_open_list().await.context("查询未平仓持仓失败")?;
        let mut positions = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.id;
            // 单条脏数据不影响其他持仓
            match GuardedPosition::try_from(row) {
                Ok(position) => positions.push(position),
                Err(e) => warn!("跳过无法解析的持仓 id={}: {}", id, e),
            }
        }
        Ok(positions)
    }

    async fn save_risk_state(&self, update: &RiskStateUpdate) -> anyhow::Result<()> {
        let sql = r#"
            UPDATE positions
            SET max_profit_pct = ?,
                max_profit_price = ?,
                trailing_stop_activated = ?,
                trailing_stop_price = ?
            WHERE id = ? AND status = 'open'
        "#;
        let params = vec![
            Value::from(update.max_profit_pct),
            opt_value(update.max_profit_price),
            Value::from(if update.trailing_stop_activated { 1 } else { 0 }),
            opt_value(update.trailing_stop_price),
            Value::from(update.id),
        ];
        let result = self.db.exec(sql, params).await?;
        if result.rows_affected == 0 {
            debug!("持仓 {} 的风控状态未写入，可能已平仓", update.id);
        }
        Ok(())
    }

    async fn mark_closed(
        &self,
        id: i64,
        reason: CloseReason,
        close_price: Option<f64>,
    ) -> anyhow::Result<()> {
        let sql = r#"
            UPDATE positions
            SET status = ?,
                close_reason = ?,
                close_price = ?,
                close_time = ?
            WHERE id = ? AND status = 'open'
        "#;
        let params = vec![
            Value::from(STATUS_CLOSED),
            Value::from(reason.as_str()),
            opt_value(close_price),
            Value::from(Utc::now().timestamp_millis()),
            Value::from(id),
        ];
        let result = self.db.exec(sql, params).await?;
        if result.rows_affected == 0 {
            warn!("持仓 {} 标记平仓未生效，可能已被其他流程关闭", id);
        } else {
            info!("持仓 {} 已标记平仓, reason={}", id, reason);
        }
        Ok(())
    }
}
