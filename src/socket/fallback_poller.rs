//! websocket 不健康时的 REST 轮询兜底

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::app_config::shutdown_manager::wait_for_stop;
use crate::socket::events::{FeedHealth, HealthEvent, PriceSample, PriceSource};
use crate::socket::price_stream::PriceStream;
use crate::trading::model::position::MarketType;

/// REST 取价
#[async_trait]
pub trait PriceFetcher: Send + Sync {
    /// 交易所没有该交易对的数据时返回 `Ok(None)`
    async fn fetch_price(
        &self,
        market: MarketType,
        symbol: &str,
    ) -> anyhow::Result<Option<PriceSample>>;
}

pub struct FallbackPoller {
    stream: Arc<PriceStream>,
    fetcher: Arc<dyn PriceFetcher>,
    poll_interval: Duration,
    active: AtomicBool,
}

impl FallbackPoller {
    pub fn new(
        stream: Arc<PriceStream>,
        fetcher: Arc<dyn PriceFetcher>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            stream,
            fetcher,
            poll_interval,
            active: AtomicBool::new(false),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn set_active(&self, active: bool) -> bool {
        let was = self.active.swap(active, Ordering::AcqRel);
        if was != active {
            let market = self.stream.market();
            if active {
                warn!("[{}] 启用 REST 轮询兜底，间隔 {:?}", market, self.poll_interval);
            } else {
                info!("[{}] 行情流恢复，停止 REST 轮询", market);
            }
        }
        was != active
    }

    /// 轮询一次所有已订阅交易对，返回成功取到价格的数量
    pub async fn poll_once(&self) -> usize {
        let market = self.stream.market();
        let mut fetched = 0;
        for symbol in self.stream.subscribed_symbols().await {
            match self.fetcher.fetch_price(market, &symbol).await {
                Ok(Some(sample)) => {
                    self.stream.ingest(sample, PriceSource::Rest).await;
                    fetched += 1;
                }
                Ok(None) => debug!("[{}] REST 未返回 {} 的价格", market, symbol),
                // 单个交易对失败只跳过本轮
                Err(e) => warn!("[{}] REST 获取 {} 价格失败: {:#}", market, symbol, e),
            }
        }
        fetched
    }

    /// 只响应本市场的健康事件；健康事件通道需要在行情流启动前订阅
    pub async fn run(
        self: Arc<Self>,
        mut health_rx: broadcast::Receiver<HealthEvent>,
        mut stop: watch::Receiver<bool>,
    ) {
        let market = self.stream.market();
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        if self.stream.health().await == FeedHealth::Unhealthy {
            self.set_active(true);
        }

        loop {
            tokio::select! {
                event = health_rx.recv() => match event {
                    Ok(event) if event.market == market => {
                        let activated = event.health == FeedHealth::Unhealthy;
                        if self.set_active(activated) && activated {
                            ticker.reset_immediately();
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("[{}] 健康事件积压，跳过 {} 条，按当前状态同步", market, skipped);
                        let activated = self.stream.health().await == FeedHealth::Unhealthy;
                        self.set_active(activated);
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = ticker.tick(), if self.is_active() => {
                    let fetched = self.poll_once().await;
                    debug!("[{}] REST 轮询完成，取到 {} 个价格", market, fetched);
                }
                _ = wait_for_stop(&mut stop) => break,
            }
        }
        self.active.store(false, Ordering::Release);
        debug!("[{}] REST 轮询任务退出", market);
    }
}
