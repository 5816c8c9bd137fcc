use std::time::Duration;

use anyhow::Context;
use rbatis::RBatis;
use rbdc_mysql::MysqlDriver;
use tracing::{debug, info};

/// 建立数据库连接池
///
/// 由启动流程显式持有并注入到各个 Model 中（RBatis 内部是 Arc，clone 成本很低）。
pub async fn init_db(db_url: &str, max_connections: u64) -> anyhow::Result<RBatis> {
    debug!("Initializing database connection pool...");
    let rb = RBatis::new();
    rb.link(MysqlDriver {}, db_url)
        .await
        .context("Failed to connect database")?;

    // 行情驱动的写入只有少量字段，连接池不需要很大
    let pool = rb.get_pool().context("Failed to get connection pool")?;
    pool.set_max_open_conns(max_connections).await;
    pool.set_max_idle_conns((max_connections / 3).max(1)).await;
    pool.set_conn_max_lifetime(Some(Duration::from_secs(3600)))
        .await;

    info!(
        "✅ 数据库连接池初始化成功, max_connections={}",
        max_connections
    );
    Ok(rb)
}

// 连接池状态，用于启动日志和排查问题
pub async fn pool_state(rb: &RBatis) -> String {
    match rb.get_pool() {
        Ok(pool) => format!("连接池状态：{:?}", pool.state().await),
        Err(e) => format!("连接池不可用: {}", e),
    }
}
