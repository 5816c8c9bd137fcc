//! 风控主循环
//!
//! 独占持仓注册表和风控引擎，在同一个循环里依次处理：
//! 价格事件、定时刷新持仓、行情恢复后的即时刷新、停止信号。
//! 价格处理（包括写库）完成后才会接收下一个事件。

use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::app_config::shutdown_manager::wait_for_stop;
use crate::socket::events::{FeedHealth, HealthEvent, PriceEvent};
use crate::trading::risk::engine::{RiskEngine, TickReport};
use crate::trading::risk::registry::PositionRegistry;

pub struct GuardService {
    registry: PositionRegistry,
    engine: RiskEngine,
    refresh_interval: Duration,
}

impl GuardService {
    pub fn new(registry: PositionRegistry, engine: RiskEngine, refresh_interval: Duration) -> Self {
        Self {
            registry,
            engine,
            refresh_interval,
        }
    }

    pub fn registry(&self) -> &PositionRegistry {
        &self.registry
    }

    /// 处理单个价格事件
    pub async fn handle_price(&mut self, event: &PriceEvent) -> TickReport {
        self.engine.on_price(&mut self.registry, &event.sample).await
    }

    /// 刷新持仓；失败时保留当前内存中的持仓
    pub async fn refresh(&mut self) {
        match self.registry.refresh().await {
            Ok(summary) if summary.changed() => info!(
                "持仓刷新: 新增 {}, 移除 {}, 保留 {}, 跳过 {}, 当前 {}",
                summary.added,
                summary.removed,
                summary.kept,
                summary.skipped,
                self.registry.len()
            ),
            Ok(summary) => debug!("持仓刷新: 无变化, 当前 {}, 跳过 {}", self.registry.len(), summary.skipped),
            Err(e) => warn!("刷新持仓失败，沿用当前缓存: {:#}", e),
        }
    }

    pub async fn run(
        mut self,
        mut price_rx: broadcast::Receiver<PriceEvent>,
        mut health_rx: broadcast::Receiver<HealthEvent>,
        mut stop: watch::Receiver<bool>,
    ) {
        info!("🚀 风控主循环启动，刷新间隔 {:?}", self.refresh_interval);
        self.refresh().await;

        let mut refresh_ticker = interval_at(
            Instant::now() + self.refresh_interval,
            self.refresh_interval,
        );
        refresh_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // 价格事件持续积压时，刷新和健康事件仍要按时处理，所以放在价格之前
        loop {
            tokio::select! {
                biased;
                _ = wait_for_stop(&mut stop) => break,
                _ = refresh_ticker.tick() => self.refresh().await,
                event = health_rx.recv() => match event {
                    // 行情中断期间可能有新开仓
                    Ok(event) if event.health == FeedHealth::Healthy => {
                        info!("[{}] 行情恢复，立即刷新持仓", event.market);
                        self.refresh().await;
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => debug!("健康事件积压 {} 条", skipped),
                    Err(RecvError::Closed) => break,
                },
                event = price_rx.recv() => match event {
                    Ok(event) => {
                        let report = self.handle_price(&event).await;
                        if report.errors > 0 || report.persist_failed > 0 {
                            debug!("{} tick 异常: {:?}", event.sample.symbol, report);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("价格事件处理不过来，丢弃 {} 个旧事件", skipped);
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        info!("风控主循环退出，当前持仓 {}", self.registry.len());
    }
}
