//! 单市场行情流
//!
//! 一个 `PriceStream` 对应一条 OKX 公共 websocket 连接：
//! - 衍生品订阅 `mark-price`，现货订阅 `tickers`
//! - 订阅集合增量同步到连接上，断线重连后全量重订
//! - 记录每个交易对的最新价和自上次重置以来的最高/最低价
//! - 定时健康检查，状态切换时通过 `HealthEvent` 广播

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tokio_retry::strategy::FixedInterval;
use tokio_retry::Retry;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::app_config::shutdown_manager::wait_for_stop;
use crate::socket::events::{
    EventBus, FeedHealth, HealthEvent, PriceEvent, PriceSample, PriceSource,
};
use crate::socket::health::HealthTracker;
use crate::trading::model::position::MarketType;
use crate::trading::okx::model::ws::{parse_ws_text, WsFrame, WsRequest};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;

#[derive(Debug, Clone)]
pub struct PriceStreamConfig {
    pub market: MarketType,
    pub ws_url: String,
    pub reconnect_delay: Duration,
    pub health_check_interval: Duration,
    pub stale_threshold: Duration,
    pub ping_interval: Duration,
}

#[derive(Debug)]
enum SubscriptionCommand {
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
}

enum SessionEnd {
    Stopped,
    Disconnected(String),
}

#[derive(Debug, Default)]
struct PriceBook {
    last: HashMap<String, f64>,
    max: HashMap<String, f64>,
    min: HashMap<String, f64>,
}

impl PriceBook {
    fn record(&mut self, symbol: &str, price: f64) {
        self.last.insert(symbol.to_string(), price);
        self.max
            .entry(symbol.to_string())
            .and_modify(|m| {
                if price > *m {
                    *m = price
                }
            })
            .or_insert(price);
        self.min
            .entry(symbol.to_string())
            .and_modify(|m| {
                if price < *m {
                    *m = price
                }
            })
            .or_insert(price);
    }

    fn reset(&mut self, symbol: &str, seed: Option<f64>) {
        match seed.or_else(|| self.last.get(symbol).copied()) {
            Some(price) => {
                self.max.insert(symbol.to_string(), price);
                self.min.insert(symbol.to_string(), price);
            }
            None => {
                self.max.remove(symbol);
                self.min.remove(symbol);
            }
        }
    }

    fn forget(&mut self, symbol: &str) {
        self.last.remove(symbol);
        self.max.remove(symbol);
        self.min.remove(symbol);
    }
}

pub struct PriceStream {
    config: PriceStreamConfig,
    book: RwLock<PriceBook>,
    subscribed: RwLock<BTreeSet<String>>,
    health: Mutex<HealthTracker>,
    command_tx: mpsc::UnboundedSender<SubscriptionCommand>,
    command_rx: Mutex<Option<mpsc::UnboundedReceiver<SubscriptionCommand>>>,
    price_tx: broadcast::Sender<PriceEvent>,
    health_tx: broadcast::Sender<HealthEvent>,
}

impl PriceStream {
    pub fn new(config: PriceStreamConfig, bus: &EventBus) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let health = HealthTracker::new(config.stale_threshold, Instant::now());
        Self {
            config,
            book: RwLock::new(PriceBook::default()),
            subscribed: RwLock::new(BTreeSet::new()),
            health: Mutex::new(health),
            command_tx,
            command_rx: Mutex::new(Some(command_rx)),
            price_tx: bus.price_tx.clone(),
            health_tx: bus.health_tx.clone(),
        }
    }

    pub fn market(&self) -> MarketType {
        self.config.market
    }

    /// 订阅交易对，返回本次新增的交易对；已订阅的忽略
    pub async fn subscribe(&self, symbols: &[String]) -> Vec<String> {
        let (added, was_idle) = {
            let mut subscribed = self.subscribed.write().await;
            let was_idle = subscribed.is_empty();
            let added: Vec<String> = symbols
                .iter()
                .filter(|s| subscribed.insert((*s).clone()))
                .cloned()
                .collect();
            (added, was_idle)
        };
        if was_idle && !added.is_empty() {
            self.health.lock().await.touch(Instant::now());
        }
        if !added.is_empty() {
            info!("[{}] 订阅行情: {:?}", self.config.market, added);
            self.send_command(SubscriptionCommand::Subscribe(added.clone()));
        }
        added
    }

    /// 取消订阅，返回实际移除的交易对；同时清掉这些交易对的价格记录
    pub async fn unsubscribe(&self, symbols: &[String]) -> Vec<String> {
        let removed: Vec<String> = {
            let mut subscribed = self.subscribed.write().await;
            symbols
                .iter()
                .filter(|s| subscribed.remove(s.as_str()))
                .cloned()
                .collect()
        };
        if !removed.is_empty() {
            {
                let mut book = self.book.write().await;
                for symbol in &removed {
                    book.forget(symbol);
                }
            }
            info!("[{}] 取消订阅行情: {:?}", self.config.market, removed);
            self.send_command(SubscriptionCommand::Unsubscribe(removed.clone()));
        }
        removed
    }

    fn send_command(&self, command: SubscriptionCommand) {
        // 连接任务未启动时命令留在队列里，连上后由全量订阅覆盖
        if let Err(e) = self.command_tx.send(command) {
            warn!("[{}] 订阅命令发送失败: {:?}", self.config.market, e.0);
        }
    }

    pub async fn subscribed_symbols(&self) -> Vec<String> {
        self.subscribed.read().await.iter().cloned().collect()
    }

    pub async fn is_subscribed(&self, symbol: &str) -> bool {
        self.subscribed.read().await.contains(symbol)
    }

    pub async fn get_price(&self, symbol: &str) -> Option<f64> {
        self.book.read().await.last.get(symbol).copied()
    }

    pub async fn get_max_price(&self, symbol: &str) -> Option<f64> {
        self.book.read().await.max.get(symbol).copied()
    }

    pub async fn get_min_price(&self, symbol: &str) -> Option<f64> {
        self.book.read().await.min.get(symbol).copied()
    }

    /// 重置最高/最低价；未给出种子价格时用最新价，没有最新价则清空
    pub async fn reset_price_tracking(&self, symbol: &str, current_price: Option<f64>) {
        self.book.write().await.reset(symbol, current_price);
    }

    pub async fn health(&self) -> FeedHealth {
        self.health.lock().await.health()
    }

    /// 写入一个价格样本并广播
    ///
    /// websocket 和 REST 轮询共用这个入口，只有 websocket 样本会刷新存活时间。
    pub async fn ingest(&self, sample: PriceSample, source: PriceSource) {
        if !(sample.price.is_finite() && sample.price > 0.0) {
            warn!(
                "[{}] 丢弃无效价格: {} {}",
                self.config.market, sample.symbol, sample.price
            );
            return;
        }

        if source == PriceSource::Stream {
            let transition = self.health.lock().await.on_update(Instant::now());
            if let Some((health, silent_for)) = transition {
                self.publish_health(health, silent_for);
            }
        }

        if !self.is_subscribed(&sample.symbol).await {
            debug!(
                "[{}] 忽略未订阅交易对的价格: {}",
                self.config.market, sample.symbol
            );
            return;
        }

        self.book.write().await.record(&sample.symbol, sample.price);

        let event = PriceEvent {
            market: self.config.market,
            sample,
            source,
        };
        if self.price_tx.send(event).is_err() {
            debug!("[{}] 没有价格事件的接收方", self.config.market);
        }
    }

    /// 执行一次健康检查，状态切换时返回新状态
    pub async fn check_health(&self) -> Option<FeedHealth> {
        // 空闲市场本来就没有推送
        if self.subscribed.read().await.is_empty() {
            self.health.lock().await.touch(Instant::now());
            return None;
        }
        let transition = self.health.lock().await.check(Instant::now());
        transition.map(|(health, silent_for)| {
            self.publish_health(health, silent_for);
            health
        })
    }

    fn publish_health(&self, health: FeedHealth, silent_for: Duration) {
        match health {
            FeedHealth::Unhealthy => warn!(
                "[{}] 行情流不健康：已 {:?} 未收到推送",
                self.config.market, silent_for
            ),
            FeedHealth::Healthy => info!(
                "[{}] 行情流恢复健康，静默了 {:?}",
                self.config.market, silent_for
            ),
        }
        let event = HealthEvent {
            market: self.config.market,
            health,
            silent_for,
            at: Utc::now(),
        };
        if self.health_tx.send(event).is_err() {
            debug!("[{}] 没有健康事件的接收方", self.config.market);
        }
    }

    /// 启动连接任务和健康检查任务
    pub fn spawn(self: &Arc<Self>, stop: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(self.clone().run_connection(stop.clone())),
            tokio::spawn(self.clone().run_health_check(stop)),
        ]
    }

    async fn run_health_check(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.health_check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_health().await;
                }
                _ = wait_for_stop(&mut stop) => break,
            }
        }
        debug!("[{}] 健康检查任务退出", self.config.market);
    }

    async fn run_connection(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        let market = self.config.market;
        let mut commands = match self.command_rx.lock().await.take() {
            Some(rx) => rx,
            None => {
                error!("[{}] 行情连接任务已在运行", market);
                return;
            }
        };

        loop {
            let connected = tokio::select! {
                res = self.connect() => res,
                _ = wait_for_stop(&mut stop) => break,
            };

            match connected {
                Ok(ws) => match self.session(ws, &mut commands, &mut stop).await {
                    SessionEnd::Stopped => break,
                    SessionEnd::Disconnected(reason) => warn!(
                        "[{}] 行情连接断开: {}，{:?} 后重连",
                        market, reason, self.config.reconnect_delay
                    ),
                },
                Err(e) => warn!("[{}] 行情连接失败: {}", market, e),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
                _ = wait_for_stop(&mut stop) => break,
            }
        }
        info!("[{}] 行情连接任务退出", market);
    }

    /// 按固定间隔重试直到连上
    async fn connect(&self) -> Result<WsStream, tokio_tungstenite::tungstenite::Error> {
        let url = self.config.ws_url.as_str();
        let market = self.config.market;
        let action = move || async move {
            match connect_async(url).await {
                Ok((ws, _)) => Ok(ws),
                Err(e) => {
                    warn!("[{}] 连接 {} 失败: {}", market, url, e);
                    Err(e)
                }
            }
        };
        Retry::spawn(FixedInterval::new(self.config.reconnect_delay), action).await
    }

    async fn session(
        &self,
        ws: WsStream,
        commands: &mut mpsc::UnboundedReceiver<SubscriptionCommand>,
        stop: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        let market = self.config.market;
        let (mut write, mut read) = ws.split();

        // 断线期间积压的增量命令已被全量订阅覆盖
        while commands.try_recv().is_ok() {}
        let symbols = self.subscribed_symbols().await;
        if !symbols.is_empty() {
            if let Err(e) = send_request(&mut write, &WsRequest::subscribe(market, &symbols)).await {
                return SessionEnd::Disconnected(e.to_string());
            }
        }
        info!("✅ [{}] 行情连接成功，订阅 {} 个交易对", market, symbols.len());

        let mut ping = interval_at(
            Instant::now() + self.config.ping_interval,
            self.config.ping_interval,
        );
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = wait_for_stop(stop) => {
                    let _ = write.send(Message::Close(None)).await;
                    return SessionEnd::Stopped;
                }
                command = commands.recv() => {
                    let request = match command {
                        Some(SubscriptionCommand::Subscribe(symbols)) => WsRequest::subscribe(market, &symbols),
                        Some(SubscriptionCommand::Unsubscribe(symbols)) => WsRequest::unsubscribe(market, &symbols),
                        None => return SessionEnd::Stopped,
                    };
                    if let Err(e) = send_request(&mut write, &request).await {
                        return SessionEnd::Disconnected(e.to_string());
                    }
                }
                _ = ping.tick() => {
                    if let Err(e) = write.send(Message::Text("ping".to_string())).await {
                        return SessionEnd::Disconnected(format!("ping 失败: {}", e));
                    }
                }
                message = read.next() => match message {
                    Some(Ok(Message::Text(text))) => self.handle_text(&text).await,
                    Some(Ok(Message::Close(frame))) => {
                        return SessionEnd::Disconnected(format!("服务端关闭连接: {:?}", frame));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return SessionEnd::Disconnected(e.to_string()),
                    None => return SessionEnd::Disconnected("连接已关闭".to_string()),
                }
            }
        }
    }

    async fn handle_text(&self, text: &str) {
        let market = self.config.market;
        match parse_ws_text(text, market) {
            Ok(WsFrame::Pong) => {}
            Ok(WsFrame::Prices(samples)) => {
                for sample in samples {
                    self.ingest(sample, PriceSource::Stream).await;
                }
            }
            Ok(WsFrame::Event(event)) => {
                if event.event == "error" {
                    error!(
                        "[{}] OKX websocket 错误: code={:?}, msg={:?}",
                        market, event.code, event.msg
                    );
                } else {
                    debug!("[{}] OKX websocket 事件: {:?}", market, event);
                }
            }
            Err(e) => warn!("[{}] 丢弃无法解析的行情报文: {}, raw={}", market, e, text),
        }
    }
}

async fn send_request(write: &mut WsWriter, request: &WsRequest) -> anyhow::Result<()> {
    let text = request.to_text()?;
    debug!("发送订阅请求: {}", text);
    write.send(Message::Text(text)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(stale_threshold: Duration) -> (PriceStream, EventBus) {
        let bus = EventBus::new(64);
        let config = PriceStreamConfig {
            market: MarketType::Swap,
            ws_url: "wss://127.0.0.1:1/ws/v5/public".to_string(),
            reconnect_delay: Duration::from_secs(5),
            health_check_interval: Duration::from_secs(5),
            stale_threshold,
            ping_interval: Duration::from_secs(25),
        };
        (PriceStream::new(config, &bus), bus)
    }

    fn symbols(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_subscribe_sends_only_delta() {
        let (stream, _bus) = stream(Duration::from_secs(10));
        assert_eq!(stream.subscribe(&symbols(&["BTC-USDT-SWAP"])).await.len(), 1);
        let added = stream
            .subscribe(&symbols(&["BTC-USDT-SWAP", "ETH-USDT-SWAP"]))
            .await;
        assert_eq!(added, symbols(&["ETH-USDT-SWAP"]));
        assert!(stream.subscribe(&symbols(&["ETH-USDT-SWAP"])).await.is_empty());
        assert!(stream.unsubscribe(&symbols(&["SOL-USDT-SWAP"])).await.is_empty());

        let mut rx = stream.command_rx.lock().await.take().unwrap();
        assert!(matches!(rx.try_recv(), Ok(SubscriptionCommand::Subscribe(s)) if s.len() == 1));
        assert!(matches!(rx.try_recv(), Ok(SubscriptionCommand::Subscribe(s)) if s == symbols(&["ETH-USDT-SWAP"])));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_ingest_tracks_extrema_and_publishes() {
        let (stream, bus) = stream(Duration::from_secs(10));
        let mut rx = bus.price_tx.subscribe();
        let symbol = "BTC-USDT-SWAP";
        stream.subscribe(&symbols(&[symbol])).await;

        assert_eq!(stream.get_price(symbol).await, None);
        for price in [100.0, 103.0, 98.0, 101.0] {
            stream
                .ingest(PriceSample::new(symbol, price, Utc::now()), PriceSource::Stream)
                .await;
        }
        assert_eq!(stream.get_price(symbol).await, Some(101.0));
        assert_eq!(stream.get_max_price(symbol).await, Some(103.0));
        assert_eq!(stream.get_min_price(symbol).await, Some(98.0));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.sample.price, 100.0);
        assert_eq!(first.source, PriceSource::Stream);

        stream.reset_price_tracking(symbol, Some(99.5)).await;
        assert_eq!(stream.get_max_price(symbol).await, Some(99.5));
        assert_eq!(stream.get_min_price(symbol).await, Some(99.5));
        stream.reset_price_tracking(symbol, None).await;
        assert_eq!(stream.get_max_price(symbol).await, Some(101.0));
    }

    #[tokio::test]
    async fn test_unsubscribed_symbol_is_not_recorded() {
        let (stream, _bus) = stream(Duration::from_secs(10));
        stream
            .ingest(PriceSample::new("DOGE-USDT-SWAP", 0.1, Utc::now()), PriceSource::Stream)
            .await;
        assert_eq!(stream.get_price("DOGE-USDT-SWAP").await, None);

        stream.subscribe(&symbols(&["DOGE-USDT-SWAP"])).await;
        stream
            .ingest(PriceSample::new("DOGE-USDT-SWAP", 0.1, Utc::now()), PriceSource::Rest)
            .await;
        assert_eq!(stream.get_price("DOGE-USDT-SWAP").await, Some(0.1));
        stream.unsubscribe(&symbols(&["DOGE-USDT-SWAP"])).await;
        assert_eq!(stream.get_price("DOGE-USDT-SWAP").await, None);
    }

    #[tokio::test]
    async fn test_idle_stream_is_not_stale() {
        let (stream, bus) = stream(Duration::from_millis(50));
        let mut health_rx = bus.health_tx.subscribe();

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(stream.check_health().await, None);
        assert_eq!(stream.health().await, FeedHealth::Healthy);

        // 第一次订阅后从订阅时刻开始计时
        stream.subscribe(&symbols(&["BTC-USDT-SWAP"])).await;
        assert_eq!(stream.check_health().await, None);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(stream.check_health().await, Some(FeedHealth::Unhealthy));
        assert_eq!(health_rx.recv().await.unwrap().health, FeedHealth::Unhealthy);
    }

    #[tokio::test]
    async fn test_health_edges_are_published_once() {
        let (stream, bus) = stream(Duration::from_millis(50));
        let mut health_rx = bus.health_tx.subscribe();
        stream.subscribe(&symbols(&["BTC-USDT-SWAP"])).await;

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(stream.check_health().await, Some(FeedHealth::Unhealthy));
        assert_eq!(stream.check_health().await, None);

        // REST 样本不算存活
        stream
            .ingest(PriceSample::new("BTC-USDT-SWAP", 1.0, Utc::now()), PriceSource::Rest)
            .await;
        assert_eq!(stream.health().await, FeedHealth::Unhealthy);

        stream
            .ingest(PriceSample::new("BTC-USDT-SWAP", 1.0, Utc::now()), PriceSource::Stream)
            .await;
        assert_eq!(stream.health().await, FeedHealth::Healthy);

        assert_eq!(health_rx.recv().await.unwrap().health, FeedHealth::Unhealthy);
        assert_eq!(health_rx.recv().await.unwrap().health, FeedHealth::Healthy);
        assert!(health_rx.try_recv().is_err());
    }
}
