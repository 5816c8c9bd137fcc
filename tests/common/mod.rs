#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};

use position_guard::socket::{EventBus, PriceFetcher, PriceSample, PriceStream, PriceStreamConfig};
use position_guard::trading::model::position::{GuardedPosition, MarketType, PositionSide, RiskStateUpdate};
use position_guard::trading::risk::{CloseReason, PositionCloser, PositionStore, RiskParams, RiskParamsResolver};

/// 内存持仓存储，可以模拟写库失败
#[derive(Default)]
pub struct MemoryStore {
    open: Mutex<HashMap<i64, GuardedPosition>>,
    pub saves: Mutex<Vec<RiskStateUpdate>>,
    pub closed: Mutex<Vec<(i64, CloseReason)>>,
    pub fail_saves: AtomicBool,
    pub fail_loads: AtomicBool,
    /// 模拟慢写库，毫秒
    pub save_delay_ms: AtomicU64,
    pub loads: AtomicUsize,
}

impl MemoryStore {
    pub fn with_positions(positions: Vec<GuardedPosition>) -> Arc<Self> {
        let store = Self::default();
        for p in positions {
            store.open.lock().unwrap().insert(p.id, p);
        }
        Arc::new(store)
    }

    pub fn insert(&self, position: GuardedPosition) {
        self.open.lock().unwrap().insert(position.id, position);
    }

    /// 模拟其他进程把持仓标记为已平仓
    pub fn remove(&self, id: i64) {
        self.open.lock().unwrap().remove(&id);
    }

    pub fn save_count(&self) -> usize {
        self.saves.lock().unwrap().len()
    }
}

#[async_trait]
impl PositionStore for MemoryStore {
    async fn load_open_positions(&self) -> anyhow::Result<Vec<GuardedPosition>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail_loads.load(Ordering::SeqCst) {
            anyhow::bail!("db unavailable");
        }
        let mut positions: Vec<GuardedPosition> = self.open.lock().unwrap().values().cloned().collect();
        positions.sort_by_key(|p| p.id);
        Ok(positions)
    }

    async fn save_risk_state(&self, update: &RiskStateUpdate) -> anyhow::Result<()> {
        let delay = self.save_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_saves.load(Ordering::SeqCst) {
            anyhow::bail!("db write timeout");
        }
        self.saves.lock().unwrap().push(update.clone());
        Ok(())
    }

    async fn mark_closed(&self, id: i64, reason: CloseReason, _close_price: Option<f64>) -> anyhow::Result<()> {
        self.open.lock().unwrap().remove(&id);
        self.closed.lock().unwrap().push((id, reason));
        Ok(())
    }
}

/// 记录平仓请求；可选地在成功后写入存储
#[derive(Default)]
pub struct RecordingCloser {
    pub calls: Mutex<Vec<(i64, CloseReason)>>,
    store: Option<Arc<MemoryStore>>,
}

impl RecordingCloser {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn confirming(store: Arc<MemoryStore>) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            store: Some(store),
        })
    }

    pub fn calls(&self) -> Vec<(i64, CloseReason)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PositionCloser for RecordingCloser {
    async fn close(&self, position: &GuardedPosition, reason: CloseReason) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push((position.id, reason));
        if let Some(store) = &self.store {
            store.mark_closed(position.id, reason, position.last_price).await?;
        }
        Ok(())
    }
}

pub struct StaticParams(pub RiskParams);

#[async_trait]
impl RiskParamsResolver for StaticParams {
    async fn resolve(&self, _position: &GuardedPosition) -> RiskParams {
        self.0.clone()
    }
}

/// REST 取价替身：按交易对返回固定价格，或者模拟失败
#[derive(Default)]
pub struct ScriptedFetcher {
    prices: Mutex<HashMap<String, f64>>,
    failing: Mutex<HashSet<String>>,
    pub calls: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn set_price(&self, symbol: &str, price: f64) {
        self.prices.lock().unwrap().insert(symbol.to_string(), price);
    }

    pub fn fail(&self, symbol: &str) {
        self.failing.lock().unwrap().insert(symbol.to_string());
    }
}

#[async_trait]
impl PriceFetcher for ScriptedFetcher {
    async fn fetch_price(&self, _market: MarketType, symbol: &str) -> anyhow::Result<Option<PriceSample>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(symbol) {
            anyhow::bail!("HTTP 502 for {}", symbol);
        }
        let price = self.prices.lock().unwrap().get(symbol).copied();
        Ok(price.map(|p| PriceSample::new(symbol, p, Utc::now())))
    }
}

pub fn default_params() -> RiskParams {
    RiskParams {
        stop_loss_pct: 2.5,
        take_profit_pct: None,
        trailing_activation_pct: 1.5,
        trailing_callback_pct: 0.5,
        cooldown_minutes: 15,
    }
}

/// 开仓一小时前，已过冷却期
pub fn position(id: i64, symbol: &str, market: MarketType, side: PositionSide, entry: f64) -> GuardedPosition {
    GuardedPosition::new(id, symbol, market, side, entry, 1.0, Utc::now() - ChronoDuration::hours(1)).unwrap()
}

pub fn stream_config(market: MarketType, stale_threshold: Duration) -> PriceStreamConfig {
    PriceStreamConfig {
        market,
        ws_url: "wss://127.0.0.1:1/ws/v5/public".to_string(),
        reconnect_delay: Duration::from_secs(5),
        health_check_interval: Duration::from_secs(5),
        stale_threshold,
        ping_interval: Duration::from_secs(25),
    }
}

pub fn price_stream(market: MarketType, bus: &EventBus) -> Arc<PriceStream> {
    Arc::new(PriceStream::new(stream_config(market, Duration::from_secs(10)), bus))
}

pub fn sample(symbol: &str, price: f64) -> PriceSample {
    PriceSample::new(symbol, price, Utc::now())
}
