//! 单持仓风控状态机
//!
//! ACTIVE → TRAILING_ACTIVE → CLOSED，冷却期叠加在 ACTIVE 上：
//! - 硬止损在任何状态、任何时间都检查（包括冷却期和移动止损激活之后）
//! - 冷却期内只记录最大浮盈
//! - 冷却期后：最大浮盈达到激活阈值即激活移动止损，之后按回撤平仓或上移止损价

use chrono::{DateTime, Utc};

use crate::trading::model::position::{GuardedPosition, PositionError};
use crate::trading::risk::types::{CloseReason, RiskParams, TickOutcome};

/// 最大浮盈更新的最小步长（百分点），用于过滤浮点噪声
pub const PROFIT_EPSILON_PCT: f64 = 0.01;

/// 当前浮盈是否足以刷新已记录的最大浮盈
///
/// 所有最大浮盈的更新都必须经过这里，保证单调不减。
pub fn exceeds_recorded_peak(pnl_pct: f64, max_profit_pct: f64) -> bool {
    pnl_pct > max_profit_pct + PROFIT_EPSILON_PCT
}

fn record_peak(position: &mut GuardedPosition, pnl_pct: f64, price: f64) -> bool {
    if exceeds_recorded_peak(pnl_pct, position.max_profit_pct) {
        position.max_profit_pct = pnl_pct;
        position.max_profit_price = Some(price);
        true
    } else {
        false
    }
}

/// 按一个价格推进持仓状态
///
/// 只修改内存中的持仓，是否写库、是否平仓由调用方根据返回值处理。
pub fn evaluate(
    position: &mut GuardedPosition,
    params: &RiskParams,
    price: f64,
    now: DateTime<Utc>,
) -> Result<TickOutcome, PositionError> {
    if !(price.is_finite() && price > 0.0) {
        return Err(PositionError::InvalidParameter(format!(
            "position {} 收到无效价格: {}",
            position.id, price
        )));
    }
    position.validate()?;
    params.validate()?;

    position.last_price = Some(price);
    let pnl_pct = position.pnl_pct(price);

    // 1. 硬止损
    if pnl_pct <= -params.stop_loss_pct {
        return Ok(TickOutcome::close(CloseReason::HardStopLoss, false));
    }

    // 2. 冷却期：只记账
    if position.in_cooldown(now, params.cooldown_minutes) {
        let changed = record_peak(position, pnl_pct, price);
        return Ok(TickOutcome::hold(changed));
    }

    let mut changed = record_peak(position, pnl_pct, price);

    // 3. 激活移动止损
    if !position.trailing_stop_activated
        && position.max_profit_pct >= params.trailing_activation_pct
    {
        position.trailing_stop_activated = true;
        position.trailing_stop_price =
            Some(position.side.stop_price(price, params.trailing_callback_pct));
        changed = true;
    }

    if !position.trailing_stop_activated {
        return Ok(TickOutcome::hold(changed));
    }

    // 4. 回撤检查
    let drawdown = position.max_profit_pct - pnl_pct;
    if drawdown >= params.trailing_callback_pct {
        return Ok(TickOutcome::close(CloseReason::TrailingStop, changed));
    }

    // 5. 止损价只朝有利方向移动
    let candidate = position.side.stop_price(price, params.trailing_callback_pct);
    let ratchet = match position.trailing_stop_price {
        Some(current) => position.side.is_more_favorable(candidate, current),
        None => true,
    };
    if ratchet {
        position.trailing_stop_price = Some(candidate);
        changed = true;
    }

    Ok(TickOutcome::hold(changed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading::model::position::{GuardState, MarketType, PositionSide};
    use crate::trading::risk::types::Decision;
    use approx::assert_relative_eq;
    use chrono::Duration;

    fn params() -> RiskParams {
        RiskParams {
            stop_loss_pct: 2.5,
            take_profit_pct: None,
            trailing_activation_pct: 1.5,
            trailing_callback_pct: 0.5,
            cooldown_minutes: 15,
        }
    }

    fn position(side: PositionSide, open_time: DateTime<Utc>) -> GuardedPosition {
        GuardedPosition::new(7, "BTC-USDT-SWAP", MarketType::Swap, side, 100.0, 1.0, open_time)
            .unwrap()
    }

    #[test]
    fn test_hard_stop_long() {
        let open = Utc::now() - Duration::hours(1);
        let mut pos = position(PositionSide::Long, open);
        let now = Utc::now();

        let out = evaluate(&mut pos, &params(), 99.0, now).unwrap();
        assert_eq!(out.decision, Decision::Hold);

        let out = evaluate(&mut pos, &params(), 97.3, now).unwrap();
        assert_eq!(out.decision, Decision::Close(CloseReason::HardStopLoss));
    }

    #[test]
    fn test_hard_stop_fires_inside_cooldown() {
        let now = Utc::now();
        let mut pos = position(PositionSide::Short, now);
        let out = evaluate(&mut pos, &params(), 102.6, now + Duration::minutes(1)).unwrap();
        assert_eq!(out.decision, Decision::Close(CloseReason::HardStopLoss));
    }

    #[test]
    fn test_cooldown_only_records_peak() {
        let now = Utc::now();
        let mut pos = position(PositionSide::Long, now);
        let out = evaluate(&mut pos, &params(), 103.0, now + Duration::minutes(5)).unwrap();
        assert_eq!(out, TickOutcome::hold(true));
        assert_relative_eq!(pos.max_profit_pct, 3.0, epsilon = 1e-9);
        assert_eq!(pos.max_profit_price, Some(103.0));
        assert!(!pos.trailing_stop_activated);
        assert_eq!(pos.trailing_stop_price, None);

        // 冷却期内大幅回撤也不会触发移动止损
        let out = evaluate(&mut pos, &params(), 100.5, now + Duration::minutes(6)).unwrap();
        assert_eq!(out, TickOutcome::hold(false));
    }

    #[test]
    fn test_epsilon_filters_noise() {
        let open = Utc::now() - Duration::hours(1);
        let mut pos = position(PositionSide::Long, open);
        evaluate(&mut pos, &params(), 101.0, Utc::now()).unwrap();
        let out = evaluate(&mut pos, &params(), 101.005, Utc::now()).unwrap();
        assert!(!out.bookkeeping_changed);
        assert_relative_eq!(pos.max_profit_pct, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_trailing_activation_ratchet_and_close() {
        let open = Utc::now() - Duration::minutes(20);
        let now = Utc::now();
        let mut pos = position(PositionSide::Long, open);

        let out = evaluate(&mut pos, &params(), 101.6, now).unwrap();
        assert_eq!(out, TickOutcome::hold(true));
        assert_eq!(pos.state(), GuardState::TrailingActive);
        assert_relative_eq!(pos.trailing_stop_price.unwrap(), 101.092, epsilon = 1e-9);

        let out = evaluate(&mut pos, &params(), 103.0, now).unwrap();
        assert_eq!(out.decision, Decision::Hold);
        assert_relative_eq!(pos.max_profit_pct, 3.0, epsilon = 1e-9);
        assert_relative_eq!(pos.trailing_stop_price.unwrap(), 102.485, epsilon = 1e-9);

        let out = evaluate(&mut pos, &params(), 102.0, now).unwrap();
        assert_eq!(out.decision, Decision::Close(CloseReason::TrailingStop));
        // 平仓 tick 不会移动止损价
        assert_relative_eq!(pos.trailing_stop_price.unwrap(), 102.485, epsilon = 1e-9);
    }

    #[test]
    fn test_short_trailing_moves_down_only() {
        let open = Utc::now() - Duration::minutes(20);
        let now = Utc::now();
        let mut pos = position(PositionSide::Short, open);

        evaluate(&mut pos, &params(), 98.0, now).unwrap();
        assert!(pos.trailing_stop_activated);
        assert_relative_eq!(pos.trailing_stop_price.unwrap(), 98.49, epsilon = 1e-9);

        // 小幅反弹，回撤不足 0.5 个点，止损价保持不变
        let out = evaluate(&mut pos, &params(), 98.3, now).unwrap();
        assert_eq!(out, TickOutcome::hold(false));
        assert_relative_eq!(pos.trailing_stop_price.unwrap(), 98.49, epsilon = 1e-9);

        evaluate(&mut pos, &params(), 97.0, now).unwrap();
        assert_relative_eq!(pos.trailing_stop_price.unwrap(), 97.485, epsilon = 1e-9);
    }

    #[test]
    fn test_hard_stop_after_activation() {
        let open = Utc::now() - Duration::minutes(20);
        let now = Utc::now();
        let wide = RiskParams {
            trailing_callback_pct: 10.0,
            ..params()
        };
        let mut pos = position(PositionSide::Long, open);
        evaluate(&mut pos, &wide, 102.0, now).unwrap();
        assert!(pos.trailing_stop_activated);

        let out = evaluate(&mut pos, &wide, 97.0, now).unwrap();
        assert_eq!(out.decision, Decision::Close(CloseReason::HardStopLoss));
    }

    #[test]
    fn test_invalid_price_is_an_error() {
        let mut pos = position(PositionSide::Long, Utc::now());
        assert!(evaluate(&mut pos, &params(), f64::NAN, Utc::now()).is_err());
        assert!(evaluate(&mut pos, &params(), 0.0, Utc::now()).is_err());
        assert_eq!(pos.last_price, None);
    }

    #[test]
    fn test_peak_and_stop_are_monotonic_over_random_walk() {
        let open = Utc::now() - Duration::minutes(30);
        let now = Utc::now();
        let loose = RiskParams {
            stop_loss_pct: 50.0,
            trailing_callback_pct: 40.0,
            ..params()
        };
        let mut pos = position(PositionSide::Long, open);

        // 确定性的伪随机游走
        let mut seed: u64 = 42;
        let mut price = 100.0;
        let mut last_peak = pos.max_profit_pct;
        let mut last_stop: Option<f64> = None;
        for _ in 0..2000 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let step = ((seed >> 33) as f64 / (1u64 << 31) as f64 - 0.5) * 1.2;
            price = (price + step).max(60.0);

            let out = evaluate(&mut pos, &loose, price, now).unwrap();
            assert!(pos.max_profit_pct >= last_peak);
            last_peak = pos.max_profit_pct;
            if let (Some(prev), Some(cur)) = (last_stop, pos.trailing_stop_price) {
                assert!(cur >= prev);
            }
            last_stop = pos.trailing_stop_price.or(last_stop);
            if out.decision != Decision::Hold {
                break;
            }
        }
    }
}
