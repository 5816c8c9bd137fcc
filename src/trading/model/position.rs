//! 受监控持仓（风控工作副本）

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PositionError {
    #[error("持仓参数无效: {0}")]
    InvalidParameter(String),

    #[error("无法识别的持仓方向: {0}")]
    UnknownSide(String),

    #[error("无法识别的市场类型: {0}")]
    UnknownMarket(String),
}

/// 行情市场类型
///
/// - `Swap`: 衍生品（永续/交割），使用标记价格
/// - `Spot`: 现货，使用最新成交价
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketType {
    Swap,
    Spot,
}

impl MarketType {
    /// OKX instType
    pub fn inst_type(&self) -> &'static str {
        match self {
            MarketType::Swap => "SWAP",
            MarketType::Spot => "SPOT",
        }
    }

    /// OKX websocket 行情频道
    pub fn channel(&self) -> &'static str {
        match self {
            MarketType::Swap => "mark-price",
            MarketType::Spot => "tickers",
        }
    }
}

impl Display for MarketType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            MarketType::Swap => write!(f, "swap"),
            MarketType::Spot => write!(f, "spot"),
        }
    }
}

impl FromStr for MarketType {
    type Err = PositionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            // 交割合约同样以标记价格为准
            "swap" | "futures" => Ok(MarketType::Swap),
            "spot" => Ok(MarketType::Spot),
            other => Err(PositionError::UnknownMarket(other.to_string())),
        }
    }
}

/// 持仓方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Long => "long",
            PositionSide::Short => "short",
        }
    }

    /// 平仓时的下单方向
    pub fn close_order_side(&self) -> &'static str {
        match self {
            PositionSide::Long => "sell",
            PositionSide::Short => "buy",
        }
    }

    /// 按回撤比例计算止损价：多头在下方，空头在上方
    pub fn stop_price(&self, price: f64, callback_pct: f64) -> f64 {
        match self {
            PositionSide::Long => price * (1.0 - callback_pct / 100.0),
            PositionSide::Short => price * (1.0 + callback_pct / 100.0),
        }
    }

    /// `candidate` 对持仓方是否严格优于 `current`
    pub fn is_more_favorable(&self, candidate: f64, current: f64) -> bool {
        match self {
            PositionSide::Long => candidate > current,
            PositionSide::Short => candidate < current,
        }
    }
}

impl FromStr for PositionSide {
    type Err = PositionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "long" | "buy" => Ok(PositionSide::Long),
            "short" | "sell" => Ok(PositionSide::Short),
            other => Err(PositionError::UnknownSide(other.to_string())),
        }
    }
}

/// 风控状态（CLOSED 由注册表移除体现）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    Active,
    TrailingActive,
}

/// 需要回写存储的风控簿记字段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskStateUpdate {
    pub id: i64,
    pub max_profit_pct: f64,
    pub max_profit_price: Option<f64>,
    pub trailing_stop_activated: bool,
    pub trailing_stop_price: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardedPosition {
    pub id: i64,
    /// 交易对，如 BTC-USDT-SWAP
    pub symbol: String,
    pub market: MarketType,
    pub side: PositionSide,
    pub entry_price: f64,
    pub quantity: f64,
    pub leverage: f64,

    /// 开仓以来的最大浮盈百分比，只增不减
    pub max_profit_pct: f64,
    pub max_profit_price: Option<f64>,
    pub trailing_stop_activated: bool,
    /// 激活前为 None
    pub trailing_stop_price: Option<f64>,

    pub stop_loss_pct: Option<f64>,
    pub take_profit_pct: Option<f64>,
    pub strategy_id: Option<i64>,
    pub open_time: DateTime<Utc>,

    /// 最近一次参与风控计算的价格（仅内存）
    #[serde(skip)]
    pub last_price: Option<f64>,
    /// 簿记已变更但尚未成功写库
    #[serde(skip)]
    pub pending_persist: bool,
}

impl GuardedPosition {
    pub fn new(
        id: i64,
        symbol: impl Into<String>,
        market: MarketType,
        side: PositionSide,
        entry_price: f64,
        quantity: f64,
        open_time: DateTime<Utc>,
    ) -> Result<Self, PositionError> {
        let position = Self {
            id,
            symbol: symbol.into(),
            market,
            side,
            entry_price,
            quantity,
            leverage: 1.0,
            max_profit_pct: 0.0,
            max_profit_price: None,
            trailing_stop_activated: false,
            trailing_stop_price: None,
            stop_loss_pct: None,
            take_profit_pct: None,
            strategy_id: None,
            open_time,
            last_price: None,
            pending_persist: false,
        };
        position.validate()?;
        Ok(position)
    }

    pub fn validate(&self) -> Result<(), PositionError> {
        if self.symbol.trim().is_empty() {
            return Err(PositionError::InvalidParameter(format!(
                "position {} 缺少交易对",
                self.id
            )));
        }
        if !(self.entry_price.is_finite() && self.entry_price > 0.0) {
            return Err(PositionError::InvalidParameter(format!(
                "position {} 开仓价无效: {}",
                self.id, self.entry_price
            )));
        }
        if !(self.quantity.is_finite() && self.quantity > 0.0) {
            return Err(PositionError::InvalidParameter(format!(
                "position {} 数量无效: {}",
                self.id, self.quantity
            )));
        }
        Ok(())
    }

    /// 带符号的价格变动百分比，空头取反
    pub fn pnl_pct(&self, price: f64) -> f64 {
        let raw = (price - self.entry_price) / self.entry_price * 100.0;
        match self.side {
            PositionSide::Long => raw,
            PositionSide::Short => -raw,
        }
    }

    pub fn state(&self) -> GuardState {
        if self.trailing_stop_activated {
            GuardState::TrailingActive
        } else {
            GuardState::Active
        }
    }

    /// 是否仍处于开仓冷却期
    pub fn in_cooldown(&self, now: DateTime<Utc>, cooldown_minutes: i64) -> bool {
        cooldown_minutes > 0 && now < self.open_time + Duration::minutes(cooldown_minutes)
    }

    pub fn risk_state(&self) -> RiskStateUpdate {
        RiskStateUpdate {
            id: self.id,
            max_profit_pct: self.max_profit_pct,
            max_profit_price: self.max_profit_price,
            trailing_stop_activated: self.trailing_stop_activated,
            trailing_stop_price: self.trailing_stop_price,
        }
    }

    /// 刷新时采用存储侧的静态字段，保留内存中的风控簿记
    pub fn adopt_static_fields(&mut self, stored: &GuardedPosition) {
        self.entry_price = stored.entry_price;
        self.quantity = stored.quantity;
        self.leverage = stored.leverage;
        self.stop_loss_pct = stored.stop_loss_pct;
        self.take_profit_pct = stored.take_profit_pct;
        self.strategy_id = stored.strategy_id;
    }
}
