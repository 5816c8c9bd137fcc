//! 风控守护进程配置
//!
//! 全部从环境变量读取（启动时先加载 `.env`），命令行参数只覆盖少量开关。

use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::app_config::env::{env_f64, env_i64, env_is_true, env_opt, env_or_default, env_u64};
use crate::error::app_error::AppError;
use crate::socket::price_stream::PriceStreamConfig;
use crate::trading::model::position::MarketType;
use crate::trading::okx::okx_client::OkxCredentials;
use crate::trading::okx::trade::PosMode;
use crate::trading::risk::types::RiskParams;

pub const DEFAULT_OKX_WS_PUBLIC_URL: &str = "wss://ws.okx.com:8443/ws/v5/public";
pub const DEFAULT_OKX_REST_BASE_URL: &str = "https://www.okx.com";

/// OKX 连接配置
#[derive(Debug, Clone)]
pub struct OkxSettings {
    pub ws_public_url: String,
    pub rest_base_url: String,
    /// 平仓需要私有接口；未配置时只能以 dry-run 模式运行
    pub credentials: Option<OkxCredentials>,
    /// isolated / cross
    pub margin_mode: String,
    /// 与 OKX 账户设置一致：long_short_mode / net_mode
    pub pos_mode: PosMode,
}

#[derive(Debug, Clone)]
pub struct GuardConfig {
    pub db_url: String,
    pub db_max_connections: u64,
    pub markets: Vec<MarketType>,
    pub okx: OkxSettings,

    pub health_check_interval: Duration,
    pub stale_threshold: Duration,
    pub reconnect_delay: Duration,
    pub ping_interval: Duration,
    pub event_capacity: usize,

    pub fallback_poll_interval: Duration,
    pub refresh_interval: Duration,

    pub risk_defaults: RiskParams,
    pub strategy_cache_ttl: Duration,
    pub dry_run: bool,
}

impl GuardConfig {
    pub fn from_env() -> Result<Self> {
        let db_url = env_opt("DB_HOST")
            .ok_or_else(|| AppError::ConfigError("DB_HOST 未配置".to_string()))?;

        let markets = parse_markets(&env_or_default("GUARD_MARKETS", "swap"))?;

        let credentials = match (
            env_opt("OKX_API_KEY"),
            env_opt("OKX_API_SECRET"),
            env_opt("OKX_PASSPHRASE"),
        ) {
            (Some(api_key), Some(api_secret), Some(passphrase)) => Some(OkxCredentials {
                api_key,
                api_secret,
                passphrase,
                simulated_trading: env_is_true("OKX_SIMULATED_TRADING", true),
            }),
            _ => None,
        };

        let risk_defaults = RiskParams {
            stop_loss_pct: env_f64("GUARD_DEFAULT_STOP_LOSS_PCT", 2.5),
            take_profit_pct: env_opt("GUARD_DEFAULT_TAKE_PROFIT_PCT")
                .and_then(|v| v.parse::<f64>().ok()),
            trailing_activation_pct: env_f64("GUARD_DEFAULT_TRAILING_ACTIVATION_PCT", 1.5),
            trailing_callback_pct: env_f64("GUARD_DEFAULT_TRAILING_CALLBACK_PCT", 0.5),
            cooldown_minutes: env_i64("GUARD_COOLDOWN_MINUTES", 15),
        };
        risk_defaults
            .validate()
            .map_err(|e| AppError::ConfigError(format!("默认风控参数无效: {}", e)))?;

        let config = Self {
            db_url,
            db_max_connections: env_u64("DB_MAX_CONNECTIONS", 20),
            markets,
            okx: OkxSettings {
                ws_public_url: env_or_default("OKX_WS_PUBLIC_URL", DEFAULT_OKX_WS_PUBLIC_URL),
                rest_base_url: env_or_default("OKX_REST_BASE_URL", DEFAULT_OKX_REST_BASE_URL),
                credentials,
                margin_mode: env_or_default("OKX_MARGIN_MODE", "isolated"),
                pos_mode: PosMode::parse(&env_or_default("OKX_POS_MODE", "long_short_mode")),
            },
            health_check_interval: secs("GUARD_HEALTH_CHECK_INTERVAL_SECS", 5),
            stale_threshold: secs("GUARD_STALE_THRESHOLD_SECS", 10),
            reconnect_delay: secs("GUARD_RECONNECT_DELAY_SECS", 5),
            ping_interval: secs("GUARD_PING_INTERVAL_SECS", 25),
            event_capacity: env_u64("GUARD_EVENT_CAPACITY", 4096).max(16) as usize,
            fallback_poll_interval: secs("GUARD_FALLBACK_POLL_INTERVAL_SECS", 2),
            refresh_interval: secs("GUARD_REFRESH_INTERVAL_SECS", 10),
            risk_defaults,
            strategy_cache_ttl: secs("GUARD_STRATEGY_CACHE_TTL_SECS", 60),
            dry_run: env_is_true("GUARD_DRY_RUN", false),
        };
        Ok(config)
    }

    /// 单个市场的行情流配置
    pub fn stream_config(&self, market: MarketType) -> PriceStreamConfig {
        PriceStreamConfig {
            market,
            ws_url: self.okx.ws_public_url.clone(),
            reconnect_delay: self.reconnect_delay,
            health_check_interval: self.health_check_interval,
            stale_threshold: self.stale_threshold,
            ping_interval: self.ping_interval,
        }
    }
}

fn secs(key: &str, default: u64) -> Duration {
    Duration::from_secs(env_u64(key, default).max(1))
}

/// 解析 `swap,spot` 形式的市场列表，去重并保持顺序
pub fn parse_markets(raw: &str) -> Result<Vec<MarketType>> {
    let mut markets = Vec::new();
    for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let market = item
            .parse::<MarketType>()
            .map_err(|e| anyhow!("GUARD_MARKETS 配置无效: {}", e))?;
        if !markets.contains(&market) {
            markets.push(market);
        }
    }
    if markets.is_empty() {
        return Err(AppError::ConfigError("GUARD_MARKETS 不能为空".to_string()).into());
    }
    Ok(markets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_markets() {
        let markets = parse_markets("swap, spot,swap").unwrap();
        assert_eq!(markets, vec![MarketType::Swap, MarketType::Spot]);
    }

    #[test]
    fn test_parse_markets_rejects_unknown_and_empty() {
        assert!(parse_markets("option").is_err());
        assert!(parse_markets(" , ").is_err());
    }
}
