//! 行情管道中流转的事件

use std::fmt::{Display, Formatter};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::trading::model::position::MarketType;

/// 单个价格样本，只在内存中流转
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSample {
    pub symbol: String,
    pub price: f64,
    pub ts: DateTime<Utc>,
}

impl PriceSample {
    pub fn new(symbol: impl Into<String>, price: f64, ts: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            ts,
        }
    }
}

/// 价格来源：只有 websocket 推送会刷新行情流的存活时间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceSource {
    Stream,
    Rest,
}

#[derive(Debug, Clone)]
pub struct PriceEvent {
    pub market: MarketType,
    pub sample: PriceSample,
    pub source: PriceSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedHealth {
    Healthy,
    Unhealthy,
}

impl Display for FeedHealth {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedHealth::Healthy => write!(f, "HEALTHY"),
            FeedHealth::Unhealthy => write!(f, "UNHEALTHY"),
        }
    }
}

/// 行情流健康状态发生变化（每次状态切换只发一次）
#[derive(Debug, Clone)]
pub struct HealthEvent {
    pub market: MarketType,
    pub health: FeedHealth,
    /// 切换时距离上一次推送的时长
    pub silent_for: Duration,
    pub at: DateTime<Utc>,
}

/// 所有行情流共用的事件通道
#[derive(Clone)]
pub struct EventBus {
    pub price_tx: broadcast::Sender<PriceEvent>,
    pub health_tx: broadcast::Sender<HealthEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (price_tx, _) = broadcast::channel(capacity);
        let (health_tx, _) = broadcast::channel(capacity.clamp(16, 256));
        Self {
            price_tx,
            health_tx,
        }
    }
}
