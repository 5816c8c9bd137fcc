use anyhow::Context;
use async_trait::async_trait;
use rbatis::{impl_select, RBatis};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::trading::risk::params::{StrategyRiskConfig, StrategyRiskSource};

/// table: strategy_config（只读取风控相关的列）
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StrategyConfigEntity {
    pub id: i64,
    pub strategy_type: String,
    pub inst_id: String,
    pub time: String,
    /// JSON，见 [`StrategyRiskConfig`]
    pub risk_config: Option<String>,
    pub is_deleted: i32,
}

impl_select!(StrategyConfigEntity{select_by_id(id: i64) =>
    "`where id = #{id} and is_deleted = 0 limit 1`"}, "strategy_config");

impl StrategyConfigEntity {
    /// 空字符串视为未配置
    pub fn parse_risk_config(&self) -> anyhow::Result<Option<StrategyRiskConfig>> {
        match self.risk_config.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => {
                let config = serde_json::from_str::<StrategyRiskConfig>(raw)
                    .with_context(|| format!("strategy_config {} 的 risk_config 无法解析", self.id))?;
                Ok(Some(config))
            }
        }
    }
}

pub struct StrategyConfigEntityModel {
    db: RBatis,
}

impl StrategyConfigEntityModel {
    pub fn new(db: RBatis) -> Self {
        Self { db }
    }

    pub async fn get_by_id(&self, id: i64) -> anyhow::Result<Option<StrategyConfigEntity>> {
        let data = StrategyConfigEntity::select_by_id(&self.db, id).await?;
        debug!("query strategy_config id={} result: {}", id, data.len());
        Ok(data.into_iter().next())
    }
}

#[async_trait]
impl StrategyRiskSource for StrategyConfigEntityModel {
    async fn load_risk_config(&self, strategy_id: i64) -> anyhow::Result<Option<StrategyRiskConfig>> {
        match self.get_by_id(strategy_id).await? {
            Some(entity) => entity.parse_risk_config(),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(risk_config: Option<&str>) -> StrategyConfigEntity {
        StrategyConfigEntity {
            id: 3,
            strategy_type: "Vegas".to_string(),
            inst_id: "BTC-USDT-SWAP".to_string(),
            time: "4H".to_string(),
            risk_config: risk_config.map(str::to_string),
            is_deleted: 0,
        }
    }

    #[test]
    fn test_parse_risk_config() {
        let config = entity(Some(r#"{"stop_loss_pct":3.0,"take_profit_pct":2.0,"unknown":true}"#))
            .parse_risk_config()
            .unwrap()
            .unwrap();
        assert_eq!(config.stop_loss_pct, Some(3.0));
        assert_eq!(config.take_profit_pct, Some(2.0));
        assert_eq!(config.trailing_activation_pct, None);

        assert!(entity(None).parse_risk_config().unwrap().is_none());
        assert!(entity(Some("  ")).parse_risk_config().unwrap().is_none());
        assert!(entity(Some("{oops")).parse_risk_config().is_err());
    }
}
