use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::socket::events::PriceSample;
use crate::trading::model::position::GuardedPosition;
use crate::trading::risk::closer::PositionCloser;
use crate::trading::risk::params::RiskParamsResolver;
use crate::trading::risk::registry::PositionRegistry;
use crate::trading::risk::store::PositionStore;
use crate::trading::risk::trailing_stop;
use crate::trading::risk::types::{CloseReason, Decision};

/// 单个价格事件的处理结果
#[derive(Debug, Default)]
pub struct TickReport {
    pub evaluated: usize,
    pub persisted: usize,
    pub persist_failed: usize,
    pub errors: usize,
    pub closed: Vec<(i64, CloseReason)>,
    /// 已分发的平仓任务，调用方可以不等待
    pub close_tasks: Vec<JoinHandle<()>>,
}

/// 实时风控引擎（价格驱动）
///
/// 对交易对上的每个持仓推进状态机，平仓交给 [`PositionCloser`]，
/// 簿记变更写回 [`PositionStore`]，写失败的在下一个 tick 重试。
pub struct RiskEngine {
    store: Arc<dyn PositionStore>,
    closer: Arc<dyn PositionCloser>,
    params: Arc<dyn RiskParamsResolver>,
}

impl RiskEngine {
    pub fn new(
        store: Arc<dyn PositionStore>,
        closer: Arc<dyn PositionCloser>,
        params: Arc<dyn RiskParamsResolver>,
    ) -> Self {
        Self {
            store,
            closer,
            params,
        }
    }

    pub async fn on_price(&self, registry: &mut PositionRegistry, sample: &PriceSample) -> TickReport {
        let mut report = TickReport::default();
        let now = Utc::now();

        // 单个持仓出错不影响同交易对的其他持仓
        for id in registry.position_ids_for(&sample.symbol) {
            let Some(position) = registry.get_mut(id) else {
                continue;
            };
            report.evaluated += 1;

            let params = self.params.resolve(position).await;
            let outcome = match trailing_stop::evaluate(position, &params, sample.price, now) {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("持仓 {} 风控计算失败: {}", id, e);
                    report.errors += 1;
                    continue;
                }
            };
            if outcome.bookkeeping_changed {
                position.pending_persist = true;
            }

            // 平仓 tick 上的簿记也先写库，平仓后不再有重试机会
            if position.pending_persist {
                match self.store.save_risk_state(&position.risk_state()).await {
                    Ok(()) => {
                        position.pending_persist = false;
                        report.persisted += 1;
                    }
                    Err(e) => {
                        warn!("持仓 {} 风控状态写入失败，下个 tick 重试: {:#}", id, e);
                        report.persist_failed += 1;
                    }
                }
            }

            if let Decision::Close(reason) = outcome.decision {
                if let Some(closed) = registry.remove_closed(id).await {
                    report.closed.push((id, reason));
                    report.close_tasks.push(self.dispatch_close(closed, reason));
                }
            }
        }

        if report.evaluated > 0 {
            debug!(
                "{} @ {} 评估 {} 个持仓，平仓 {} 个",
                sample.symbol,
                sample.price,
                report.evaluated,
                report.closed.len()
            );
        }
        report
    }

    /// 平仓在独立任务中执行，失败只记录不重试
    fn dispatch_close(&self, position: GuardedPosition, reason: CloseReason) -> JoinHandle<()> {
        let price = position.last_price.unwrap_or(position.entry_price);
        info!(
            "🔻 触发平仓 id={} symbol={} side={} reason={} price={} pnl={:.2}% max_profit={:.2}% trailing_stop={:?}",
            position.id,
            position.symbol,
            position.side.as_str(),
            reason,
            price,
            position.pnl_pct(price),
            position.max_profit_pct,
            position.trailing_stop_price
        );

        let closer = self.closer.clone();
        tokio::spawn(async move {
            if let Err(e) = closer.close(&position, reason).await {
                error!(
                    "❌ 平仓失败，需要人工处理 id={} symbol={} reason={}: {:#}",
                    position.id, position.symbol, reason, e
                );
            }
        })
    }
}
