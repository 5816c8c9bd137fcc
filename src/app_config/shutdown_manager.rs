use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{watch, RwLock};
use tracing::{error, info, warn};

/// 关闭回调函数
pub type ShutdownHook = Box<
    dyn Fn() -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send>>
        + Send
        + Sync,
>;

/// 关闭配置
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// 总超时时间
    pub total_timeout: Duration,
    /// 每个钩子的超时时间
    pub hook_timeout: Duration,
    /// 是否强制退出
    pub force_exit_on_timeout: bool,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            total_timeout: Duration::from_secs(30),
            hook_timeout: Duration::from_secs(10),
            force_exit_on_timeout: true,
        }
    }
}

/// 优雅停止管理器
///
/// 由启动流程创建并显式传递；各个后台循环通过 [`ShutdownManager::subscribe`]
/// 拿到停止信号，在 `select!` 中监听。
pub struct ShutdownManager {
    is_shutting_down: Arc<AtomicBool>,
    stop_tx: watch::Sender<bool>,
    shutdown_hooks: Arc<RwLock<Vec<(String, ShutdownHook)>>>,
    config: ShutdownConfig,
}

impl ShutdownManager {
    pub fn new(config: ShutdownConfig) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            is_shutting_down: Arc::new(AtomicBool::new(false)),
            stop_tx,
            shutdown_hooks: Arc::new(RwLock::new(Vec::new())),
            config,
        }
    }

    pub fn new_default() -> Self {
        Self::new(ShutdownConfig::default())
    }

    /// 检查是否正在关闭
    pub fn is_shutting_down(&self) -> bool {
        self.is_shutting_down.load(Ordering::Acquire)
    }

    /// 订阅停止信号，值变为 true 即表示需要退出
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.stop_tx.subscribe()
    }

    /// 注册关闭回调（按注册顺序执行）
    pub async fn register_shutdown_hook<F, Fut>(&self, name: String, hook: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        let boxed_hook: ShutdownHook = Box::new(move || Box::pin(hook()));
        let mut hooks = self.shutdown_hooks.write().await;
        info!("注册关闭回调: {}", name);
        hooks.push((name, boxed_hook));
    }

    /// 执行优雅关闭：先广播停止信号，再依次执行回调
    pub async fn shutdown(&self) -> Result<()> {
        if self
            .is_shutting_down
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("关闭已在进行中");
            return Ok(());
        }

        // 没有订阅者时 send 会失败，这里不关心
        let _ = self.stop_tx.send(true);

        info!("开始执行优雅关闭，总超时: {:?}", self.config.total_timeout);
        let start_time = std::time::Instant::now();

        let shutdown_result =
            tokio::time::timeout(self.config.total_timeout, self.execute_shutdown_hooks()).await;

        match shutdown_result {
            Ok(()) => {
                info!("优雅关闭完成，耗时: {:?}", start_time.elapsed());
                Ok(())
            }
            Err(_) => {
                error!("关闭超时 ({:?})", self.config.total_timeout);
                if self.config.force_exit_on_timeout {
                    error!("强制退出程序");
                    std::process::exit(1);
                }
                Err(anyhow::anyhow!("关闭超时"))
            }
        }
    }

    async fn execute_shutdown_hooks(&self) {
        let hooks = self.shutdown_hooks.read().await;
        let hook_count = hooks.len();
        if hook_count == 0 {
            info!("没有注册的关闭回调");
            return;
        }

        for (index, (name, hook)) in hooks.iter().enumerate() {
            let hook_start = std::time::Instant::now();
            match tokio::time::timeout(self.config.hook_timeout, hook()).await {
                Ok(Ok(())) => {
                    info!(
                        "关闭回调 {}/{} [{}] 完成，耗时: {:?}",
                        index + 1,
                        hook_count,
                        name,
                        hook_start.elapsed()
                    );
                }
                // 单个回调失败不影响后续回调
                Ok(Err(e)) => {
                    error!("关闭回调 {}/{} [{}] 失败: {}", index + 1, hook_count, name, e);
                }
                Err(_) => {
                    error!(
                        "关闭回调 {}/{} [{}] 超时 ({:?})",
                        index + 1,
                        hook_count,
                        name,
                        self.config.hook_timeout
                    );
                }
            }
        }
    }

    /// 等待关闭信号
    pub async fn wait_for_shutdown_signal() -> Result<&'static str> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let mut sigterm = signal(SignalKind::terminate())?;
            let mut sigint = signal(SignalKind::interrupt())?;
            let mut sigquit = signal(SignalKind::quit())?;

            let name = tokio::select! {
                _ = sigterm.recv() => "SIGTERM",
                _ = sigint.recv() => "SIGINT",
                _ = sigquit.recv() => "SIGQUIT",
            };
            Ok(name)
        }

        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await?;
            Ok("CTRL+C")
        }
    }
}

/// 等待停止信号（发送端被释放同样视为停止），用于各后台循环的 `select!`
pub async fn wait_for_stop(stop: &mut watch::Receiver<bool>) {
    while !*stop.borrow_and_update() {
        if stop.changed().await.is_err() {
            return;
        }
    }
}
