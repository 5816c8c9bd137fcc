use std::time::Duration;

use tokio::time::Instant;

use crate::socket::events::FeedHealth;

/// 行情流健康状态
///
/// 只根据 websocket 推送判断：距上次推送超过阈值即不健康，
/// 下一次推送立即恢复。每次切换只返回一次。
#[derive(Debug)]
pub struct HealthTracker {
    stale_threshold: Duration,
    last_update: Instant,
    health: FeedHealth,
}

impl HealthTracker {
    /// 启动时视为健康，`last_update` 为启动时间
    pub fn new(stale_threshold: Duration, started_at: Instant) -> Self {
        Self {
            stale_threshold,
            last_update: started_at,
            health: FeedHealth::Healthy,
        }
    }

    pub fn health(&self) -> FeedHealth {
        self.health
    }

    pub fn last_update(&self) -> Instant {
        self.last_update
    }

    /// 收到一次推送；从不健康恢复时返回 `(Healthy, 静默时长)`
    pub fn on_update(&mut self, now: Instant) -> Option<(FeedHealth, Duration)> {
        let silent_for = now.saturating_duration_since(self.last_update);
        self.last_update = now;
        if self.health == FeedHealth::Unhealthy {
            self.health = FeedHealth::Healthy;
            return Some((FeedHealth::Healthy, silent_for));
        }
        None
    }

    /// 没有订阅任何交易对时不计静默时间
    pub fn touch(&mut self, now: Instant) {
        self.last_update = now;
    }

    /// 定时检查；刚变为不健康时返回 `(Unhealthy, 静默时长)`
    pub fn check(&mut self, now: Instant) -> Option<(FeedHealth, Duration)> {
        let silent_for = now.saturating_duration_since(self.last_update);
        if self.health == FeedHealth::Healthy && silent_for > self.stale_threshold {
            self.health = FeedHealth::Unhealthy;
            return Some((FeedHealth::Unhealthy, silent_for));
        }
        None
    }
}
