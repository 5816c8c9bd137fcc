//! 风控参数解析
//!
//! 优先级：持仓自身覆盖 > 策略配置 `risk_config` > 进程默认值。
//! 策略没有显式的移动止损激活阈值时，用止盈百分比作为激活阈值。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::warn;

use crate::trading::model::position::GuardedPosition;
use crate::trading::risk::types::RiskParams;

/// `strategy_config.risk_config` 中与持仓风控相关的字段，均可缺省
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyRiskConfig {
    pub stop_loss_pct: Option<f64>,
    pub take_profit_pct: Option<f64>,
    pub trailing_activation_pct: Option<f64>,
    pub trailing_callback_pct: Option<f64>,
    pub cooldown_minutes: Option<i64>,
}

#[async_trait]
pub trait StrategyRiskSource: Send + Sync {
    async fn load_risk_config(&self, strategy_id: i64) -> anyhow::Result<Option<StrategyRiskConfig>>;
}

/// 每个 tick 为持仓解析风控参数；内部兜底，不返回错误
#[async_trait]
pub trait RiskParamsResolver: Send + Sync {
    async fn resolve(&self, position: &GuardedPosition) -> RiskParams;
}

fn positive(v: Option<f64>) -> Option<f64> {
    v.filter(|x| x.is_finite() && *x > 0.0)
}

/// 合并三层参数，非法值（非正数、NaN）逐字段跳过
pub fn merge_params(
    defaults: &RiskParams,
    strategy: Option<&StrategyRiskConfig>,
    position: &GuardedPosition,
) -> RiskParams {
    let strategy_field = |f: fn(&StrategyRiskConfig) -> Option<f64>| positive(strategy.and_then(f));

    let stop_loss_pct = positive(position.stop_loss_pct)
        .or_else(|| strategy_field(|s| s.stop_loss_pct))
        .unwrap_or(defaults.stop_loss_pct);

    let take_profit_pct = positive(position.take_profit_pct)
        .or_else(|| strategy_field(|s| s.take_profit_pct))
        .or(defaults.take_profit_pct);

    let trailing_activation_pct = strategy_field(|s| s.trailing_activation_pct)
        .or(take_profit_pct)
        .unwrap_or(defaults.trailing_activation_pct);

    let trailing_callback_pct = strategy_field(|s| s.trailing_callback_pct)
        .unwrap_or(defaults.trailing_callback_pct);

    let cooldown_minutes = strategy
        .and_then(|s| s.cooldown_minutes)
        .filter(|m| *m >= 0)
        .unwrap_or(defaults.cooldown_minutes);

    RiskParams {
        stop_loss_pct,
        take_profit_pct,
        trailing_activation_pct,
        trailing_callback_pct,
        cooldown_minutes,
    }
}

struct CacheEntry {
    config: Option<StrategyRiskConfig>,
    loaded_at: Instant,
}

/// 按策略 id 缓存 `risk_config`，过期后重新读取
///
/// 读取失败时继续使用过期的缓存，没有缓存则只用默认值，硬止损始终可以计算。
pub struct CachedRiskParamsResolver {
    defaults: RiskParams,
    source: Arc<dyn StrategyRiskSource>,
    ttl: Duration,
    cache: Mutex<HashMap<i64, CacheEntry>>,
}

impl CachedRiskParamsResolver {
    pub fn new(defaults: RiskParams, source: Arc<dyn StrategyRiskSource>, ttl: Duration) -> Self {
        Self {
            defaults,
            source,
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    async fn strategy_config(&self, strategy_id: i64) -> Option<StrategyRiskConfig> {
        {
            let cache = self.cache.lock().await;
            if let Some(entry) = cache.get(&strategy_id) {
                if entry.loaded_at.elapsed() < self.ttl {
                    return entry.config.clone();
                }
            }
        }

        match self.source.load_risk_config(strategy_id).await {
            Ok(config) => {
                let mut cache = self.cache.lock().await;
                cache.insert(
                    strategy_id,
                    CacheEntry {
                        config: config.clone(),
                        loaded_at: Instant::now(),
                    },
                );
                config
            }
            Err(e) => {
                let cache = self.cache.lock().await;
                match cache.get(&strategy_id) {
                    Some(stale) => {
                        warn!("读取策略 {} 风控配置失败，使用过期缓存: {:#}", strategy_id, e);
                        stale.config.clone()
                    }
                    None => {
                        warn!("读取策略 {} 风控配置失败，使用默认参数: {:#}", strategy_id, e);
                        None
                    }
                }
            }
        }
    }
}

#[async_trait]
impl RiskParamsResolver for CachedRiskParamsResolver {
    async fn resolve(&self, position: &GuardedPosition) -> RiskParams {
        let strategy = match position.strategy_id {
            Some(id) => self.strategy_config(id).await,
            None => None,
        };
        merge_params(&self.defaults, strategy.as_ref(), position)
    }
}
