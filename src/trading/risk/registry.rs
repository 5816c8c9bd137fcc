//! 未平仓持仓的内存索引
//!
//! 由风控主循环独占，不加锁。按 id 和交易对两个维度索引，
//! 行情订阅跟随持仓集合增减。

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::socket::price_stream::PriceStream;
use crate::trading::model::position::{GuardedPosition, MarketType};
use crate::trading::risk::store::PositionStore;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RefreshSummary {
    pub added: usize,
    pub removed: usize,
    pub kept: usize,
    /// 已平仓但存储仍显示未平仓，或市场未启用
    pub skipped: usize,
}

impl RefreshSummary {
    pub fn changed(&self) -> bool {
        self.added > 0 || self.removed > 0
    }
}

pub struct PositionRegistry {
    store: Arc<dyn PositionStore>,
    streams: HashMap<MarketType, Arc<PriceStream>>,
    positions: HashMap<i64, GuardedPosition>,
    by_symbol: HashMap<String, BTreeSet<i64>>,
    /// 已决定平仓的持仓，在存储确认平仓前不会被刷新重新加入
    closed_ids: HashSet<i64>,
}

impl PositionRegistry {
    pub fn new(store: Arc<dyn PositionStore>, streams: HashMap<MarketType, Arc<PriceStream>>) -> Self {
        Self {
            store,
            streams,
            positions: HashMap::new(),
            by_symbol: HashMap::new(),
            closed_ids: HashSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn get(&self, id: i64) -> Option<&GuardedPosition> {
        self.positions.get(&id)
    }

    pub fn get_mut(&mut self, id: i64) -> Option<&mut GuardedPosition> {
        self.positions.get_mut(&id)
    }

    pub fn is_closing(&self, id: i64) -> bool {
        self.closed_ids.contains(&id)
    }

    pub fn stream_for(&self, market: MarketType) -> Option<&Arc<PriceStream>> {
        self.streams.get(&market)
    }

    /// 交易对上的持仓 id，按 id 升序
    pub fn position_ids_for(&self, symbol: &str) -> Vec<i64> {
        self.by_symbol
            .get(symbol)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn positions_for(&self, symbol: &str) -> Vec<&GuardedPosition> {
        self.by_symbol
            .get(symbol)
            .map(|ids| ids.iter().filter_map(|id| self.positions.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn symbols(&self) -> Vec<String> {
        self.by_symbol.keys().cloned().collect()
    }

    fn insert(&mut self, position: GuardedPosition) {
        self.by_symbol
            .entry(position.symbol.clone())
            .or_default()
            .insert(position.id);
        self.positions.insert(position.id, position);
    }

    /// 移出索引，返回交易对上是否已没有持仓
    fn detach(&mut self, id: i64) -> Option<(GuardedPosition, bool)> {
        let position = self.positions.remove(&id)?;
        let symbol_empty = match self.by_symbol.get_mut(&position.symbol) {
            Some(ids) => {
                ids.remove(&id);
                ids.is_empty()
            }
            None => true,
        };
        if symbol_empty {
            self.by_symbol.remove(&position.symbol);
        }
        Some((position, symbol_empty))
    }

    /// 风控决定平仓后移除；重复调用返回 None
    pub async fn remove_closed(&mut self, id: i64) -> Option<GuardedPosition> {
        let (position, symbol_empty) = self.detach(id)?;
        self.closed_ids.insert(id);
        if symbol_empty {
            self.unsubscribe(position.market, &[position.symbol.clone()]).await;
        }
        Some(position)
    }

    /// 从存储重新加载未平仓持仓并与内存对比
    ///
    /// 读取失败时返回错误，内存中的持仓保持不变。
    pub async fn refresh(&mut self) -> anyhow::Result<RefreshSummary> {
        let stored = self.store.load_open_positions().await?;
        let open_ids: HashSet<i64> = stored.iter().map(|p| p.id).collect();
        let mut summary = RefreshSummary::default();

        // 存储已确认平仓的，不再需要墓碑
        self.closed_ids.retain(|id| open_ids.contains(id));

        let gone: Vec<i64> = self
            .positions
            .keys()
            .filter(|id| !open_ids.contains(id))
            .copied()
            .collect();
        for id in gone {
            if let Some((position, _)) = self.detach(id) {
                info!("持仓 {} ({}) 已不在未平仓列表中，移出风控", id, position.symbol);
                summary.removed += 1;
            }
        }

        let mut added: Vec<(MarketType, String)> = Vec::new();
        for stored_position in stored {
            let id = stored_position.id;
            if self.closed_ids.contains(&id) {
                debug!("持仓 {} 平仓处理中，跳过", id);
                summary.skipped += 1;
                continue;
            }
            if !self.streams.contains_key(&stored_position.market) {
                debug!("持仓 {} 的市场 {} 未启用，跳过", id, stored_position.market);
                summary.skipped += 1;
                continue;
            }
            match self.positions.get_mut(&id) {
                Some(existing) => {
                    existing.adopt_static_fields(&stored_position);
                    summary.kept += 1;
                }
                None => {
                    info!(
                        "新增风控持仓 id={} symbol={} side={} entry={}",
                        id,
                        stored_position.symbol,
                        stored_position.side.as_str(),
                        stored_position.entry_price
                    );
                    added.push((stored_position.market, stored_position.symbol.clone()));
                    self.insert(stored_position);
                    summary.added += 1;
                }
            }
        }

        self.sync_subscriptions(&added).await;
        Ok(summary)
    }

    /// 让每个行情流的订阅集合与当前持仓一致，新持仓的交易对重置最高/最低价
    async fn sync_subscriptions(&self, added: &[(MarketType, String)]) {
        for (market, stream) in &self.streams {
            let wanted: BTreeSet<String> = self
                .positions
                .values()
                .filter(|p| p.market == *market)
                .map(|p| p.symbol.clone())
                .collect();
            let wanted: Vec<String> = wanted.into_iter().collect();
            stream.subscribe(&wanted).await;

            let stale: Vec<String> = stream
                .subscribed_symbols()
                .await
                .into_iter()
                .filter(|s| !self.by_symbol.contains_key(s))
                .collect();
            if !stale.is_empty() {
                stream.unsubscribe(&stale).await;
            }
        }

        for (market, symbol) in added {
            if let Some(stream) = self.streams.get(market) {
                stream.reset_price_tracking(symbol, None).await;
            }
        }
    }

    async fn unsubscribe(&self, market: MarketType, symbols: &[String]) {
        match self.streams.get(&market) {
            Some(stream) => {
                stream.unsubscribe(symbols).await;
            }
            None => warn!("市场 {} 没有对应的行情流", market),
        }
    }
}
