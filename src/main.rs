use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use position_guard::app::bootstrap;
use position_guard::app_config::guard::{parse_markets, GuardConfig};
use position_guard::app_config::log::setup_logging;

/// 实时持仓风控：硬止损 + 移动止损
#[derive(Parser, Debug)]
#[command(name = "position_guard", version)]
struct Cli {
    /// 只记录平仓决策，不调用交易所
    #[arg(long)]
    dry_run: bool,

    /// 启用的市场，逗号分隔：swap,spot（覆盖 GUARD_MARKETS）
    #[arg(long)]
    markets: Option<String>,

    /// 指定 .env 文件路径
    #[arg(long)]
    env_file: Option<PathBuf>,
}

// 单线程调度：所有任务在同一个线程上协作执行
#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.env_file {
        Some(path) => {
            dotenv::from_path(path)
                .with_context(|| format!("加载 {} 失败", path.display()))?;
        }
        None => {
            dotenv::dotenv().ok();
        }
    }

    setup_logging()?;

    let mut config = GuardConfig::from_env()?;
    if cli.dry_run {
        config.dry_run = true;
    }
    if let Some(markets) = cli.markets.as_deref() {
        config.markets = parse_markets(markets)?;
    }

    if let Err(e) = bootstrap::run(config).await {
        error!("❌ 持仓风控异常退出: {:#}", e);
        return Err(e);
    }
    info!("bye");
    Ok(())
}
