use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::app_config::db::{init_db, pool_state};
use crate::app_config::guard::GuardConfig;
use crate::app_config::shutdown_manager::ShutdownManager;
use crate::socket::events::EventBus;
use crate::socket::fallback_poller::FallbackPoller;
use crate::socket::price_stream::PriceStream;
use crate::trading::model::entity::position_entity::PositionEntityModel;
use crate::trading::model::position::MarketType;
use crate::trading::model::strategy::strategy_config::StrategyConfigEntityModel;
use crate::trading::okx::market::OkxMarketApi;
use crate::trading::okx::okx_client::OkxClient;
use crate::trading::okx::trade::OkxTradeApi;
use crate::trading::risk::closer::{DryRunCloser, OkxPositionCloser, PositionCloser};
use crate::trading::risk::engine::RiskEngine;
use crate::trading::risk::params::CachedRiskParamsResolver;
use crate::trading::risk::registry::PositionRegistry;
use crate::trading::risk::store::PositionStore;
use crate::trading::services::guard_service::GuardService;

const TASK_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// 按配置选择平仓执行方：dry-run 或缺少凭证时只打日志
fn build_closer(
    config: &GuardConfig,
    okx_client: &Arc<OkxClient>,
    store: &Arc<dyn PositionStore>,
) -> Arc<dyn PositionCloser> {
    if config.dry_run {
        warn!("⚠️ dry-run 模式：触发平仓只记录日志");
        return Arc::new(DryRunCloser);
    }
    if !okx_client.has_credentials() {
        warn!("⚠️ 未配置 OKX API 凭证，自动切换为 dry-run 模式");
        return Arc::new(DryRunCloser);
    }
    Arc::new(OkxPositionCloser::new(
        OkxTradeApi::new(okx_client.clone()),
        store.clone(),
        config.okx.margin_mode.clone(),
        config.okx.pos_mode,
    ))
}

/// 组装并运行风控守护进程，直到收到退出信号
pub async fn run(config: GuardConfig) -> anyhow::Result<()> {
    info!(
        "启动持仓风控: markets={:?}, dry_run={}, stale_threshold={:?}",
        config.markets, config.dry_run, config.stale_threshold
    );

    let db = init_db(&config.db_url, config.db_max_connections).await?;
    info!("{}", pool_state(&db).await);

    let shutdown = ShutdownManager::new_default();
    let bus = EventBus::new(config.event_capacity);
    // 所有接收端在行情任务启动前订阅，避免漏掉最早的事件
    let price_rx = bus.price_tx.subscribe();
    let service_health_rx = bus.health_tx.subscribe();

    let okx_client = Arc::new(
        OkxClient::new(&config.okx.rest_base_url, config.okx.credentials.clone())
            .context("创建 OKX 客户端失败")?,
    );
    let market_api = Arc::new(OkxMarketApi::new(okx_client.clone()));
    let store: Arc<dyn PositionStore> = Arc::new(PositionEntityModel::new(db.clone()));

    let mut handles: Vec<JoinHandle<()>> = Vec::new();
    let mut streams: HashMap<MarketType, Arc<PriceStream>> = HashMap::new();
    for market in &config.markets {
        let stream = Arc::new(PriceStream::new(config.stream_config(*market), &bus));
        let poller = Arc::new(FallbackPoller::new(
            stream.clone(),
            market_api.clone(),
            config.fallback_poll_interval,
        ));
        handles.push(tokio::spawn(
            poller.run(bus.health_tx.subscribe(), shutdown.subscribe()),
        ));
        streams.insert(*market, stream);
    }
    for stream in streams.values() {
        handles.extend(stream.spawn(shutdown.subscribe()));
    }

    let closer = build_closer(&config, &okx_client, &store);
    let resolver = Arc::new(CachedRiskParamsResolver::new(
        config.risk_defaults.clone(),
        Arc::new(StrategyConfigEntityModel::new(db.clone())),
        config.strategy_cache_ttl,
    ));
    let registry = PositionRegistry::new(store.clone(), streams);
    let engine = RiskEngine::new(store, closer, resolver);
    let service = GuardService::new(registry, engine, config.refresh_interval);
    let mut service_handle = tokio::spawn(service.run(
        price_rx,
        service_health_rx,
        shutdown.subscribe(),
    ));

    let pool_db = db.clone();
    shutdown
        .register_shutdown_hook("db_pool_state".to_string(), move || {
            let db = pool_db.clone();
            async move {
                info!("关闭前{}", pool_state(&db).await);
                Ok(())
            }
        })
        .await;

    // 主循环意外退出时同样走关闭流程
    tokio::select! {
        signal = ShutdownManager::wait_for_shutdown_signal() => {
            info!("📡 接收到 {} 信号", signal?);
        }
        res = &mut service_handle => {
            if let Err(e) = res {
                error!("❌ 风控主循环异常退出: {}", e);
            }
        }
    }

    info!("🛑 开始优雅关闭...");
    shutdown.shutdown().await?;

    if !service_handle.is_finished() {
        if tokio::time::timeout(TASK_JOIN_TIMEOUT, &mut service_handle).await.is_err() {
            warn!("风控主循环未在 {:?} 内退出", TASK_JOIN_TIMEOUT);
        }
    }
    for handle in handles {
        if tokio::time::timeout(TASK_JOIN_TIMEOUT, handle).await.is_err() {
            warn!("后台任务未在 {:?} 内退出", TASK_JOIN_TIMEOUT);
        }
    }
    info!("✅ 持仓风控已退出");
    Ok(())
}
