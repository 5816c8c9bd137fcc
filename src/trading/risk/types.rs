use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::trading::model::position::PositionError;

/// 平仓原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CloseReason {
    /// 亏损达到硬止损线
    HardStopLoss,
    /// 移动止损：自最大浮盈回撤达到回调阈值
    TrailingStop,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::HardStopLoss => "hard_stop_loss",
            CloseReason::TrailingStop => "trailing_stop",
        }
    }
}

impl Display for CloseReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单个持仓在某一 tick 上的风控参数（百分比均为百分点，2.5 表示 2.5%）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskParams {
    pub stop_loss_pct: f64,
    pub take_profit_pct: Option<f64>,
    pub trailing_activation_pct: f64,
    pub trailing_callback_pct: f64,
    pub cooldown_minutes: i64,
}

impl Default for RiskParams {
    fn default() -> Self {
        Self {
            stop_loss_pct: 2.5,
            take_profit_pct: None,
            trailing_activation_pct: 1.5,
            trailing_callback_pct: 0.5,
            cooldown_minutes: 15,
        }
    }
}

impl RiskParams {
    pub fn validate(&self) -> Result<(), PositionError> {
        let positive = |name: &str, v: f64| {
            if v.is_finite() && v > 0.0 {
                Ok(())
            } else {
                Err(PositionError::InvalidParameter(format!("{} 必须为正数: {}", name, v)))
            }
        };
        positive("stop_loss_pct", self.stop_loss_pct)?;
        positive("trailing_activation_pct", self.trailing_activation_pct)?;
        positive("trailing_callback_pct", self.trailing_callback_pct)?;
        if let Some(tp) = self.take_profit_pct {
            positive("take_profit_pct", tp)?;
        }
        if self.cooldown_minutes < 0 {
            return Err(PositionError::InvalidParameter(format!(
                "cooldown_minutes 不能为负数: {}",
                self.cooldown_minutes
            )));
        }
        Ok(())
    }
}

/// 单个 tick 的风控结论
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Hold,
    Close(CloseReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    pub decision: Decision,
    /// 簿记字段（最大浮盈 / 移动止损）本 tick 是否发生变化
    pub bookkeeping_changed: bool,
}

impl TickOutcome {
    pub fn hold(bookkeeping_changed: bool) -> Self {
        Self {
            decision: Decision::Hold,
            bookkeeping_changed,
        }
    }

    pub fn close(reason: CloseReason, bookkeeping_changed: bool) -> Self {
        Self {
            decision: Decision::Close(reason),
            bookkeeping_changed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params_are_valid() {
        assert!(RiskParams::default().validate().is_ok());
    }

    #[test]
    fn test_non_positive_callback_rejected() {
        let params = RiskParams {
            trailing_callback_pct: 0.0,
            ..RiskParams::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_close_reason_wire_names() {
        assert_eq!(CloseReason::HardStopLoss.to_string(), "hard_stop_loss");
        assert_eq!(CloseReason::TrailingStop.as_str(), "trailing_stop");
    }
}
