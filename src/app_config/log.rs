use std::env;
use std::sync::OnceLock;

use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::app_config::env::env_is_true;

// 日志文件句柄必须在进程生命周期内保持
static INFO_GUARD: OnceLock<WorkerGuard> = OnceLock::new();
static ERROR_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

// 日志配置结构体
#[derive(Debug, Clone)]
struct LogConfig {
    app_env: String,
    log_level: String,
    log_dir: String,
    log_rotation: String,
    info_file_name: String,
    error_file_name: String,
    enable_console_logging: bool,
    db_debug: bool,
}

impl LogConfig {
    fn from_env() -> Self {
        Self {
            app_env: env::var("APP_ENV").unwrap_or_else(|_| "local".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_dir: env::var("LOG_DIR").unwrap_or_else(|_| "log_files".to_string()),
            log_rotation: env::var("LOG_ROTATION").unwrap_or_else(|_| "daily".to_string()),
            info_file_name: env::var("LOG_INFO_FILE").unwrap_or_else(|_| "info.log".to_string()),
            error_file_name: env::var("LOG_ERROR_FILE")
                .unwrap_or_else(|_| "error.log".to_string()),
            enable_console_logging: env_is_true("ENABLE_CONSOLE_LOGGING", true),
            db_debug: env_is_true("DB_DEBUG", false),
        }
    }
}

// 解析时间轮转策略
fn parse_rotation(s: &str) -> Rotation {
    match s.to_lowercase().as_str() {
        "minutely" | "minute" | "min" => Rotation::MINUTELY,
        "hourly" | "hour" | "hr" => Rotation::HOURLY,
        "daily" | "day" => Rotation::DAILY,
        "never" => Rotation::NEVER,
        _ => Rotation::DAILY,
    }
}

// 设置日志
pub fn setup_logging() -> anyhow::Result<()> {
    let config = LogConfig::from_env();

    // 本地环境：仅控制台输出
    if config.app_env.eq_ignore_ascii_case("local") {
        let subscriber = Registry::default().with(
            fmt::layer()
                .with_ansi(true)
                .with_target(false)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_level(true)
                .with_writer(std::io::stdout)
                .with_filter(EnvFilter::new(&config.log_level)),
        );
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        // 非本地环境：文件输出（可选控制台）
        std::fs::create_dir_all(&config.log_dir).map_err(|e| {
            anyhow::anyhow!("Failed to create log directory '{}': {}", config.log_dir, e)
        })?;

        let info_file = RollingFileAppender::new(
            parse_rotation(&config.log_rotation),
            &config.log_dir,
            &config.info_file_name,
        );
        let error_file = RollingFileAppender::new(
            parse_rotation(&config.log_rotation),
            &config.log_dir,
            &config.error_file_name,
        );

        let (info_non_blocking, info_guard) = tracing_appender::non_blocking(info_file);
        let (error_non_blocking, error_guard) = tracing_appender::non_blocking(error_file);

        INFO_GUARD
            .set(info_guard)
            .map_err(|_| anyhow::anyhow!("Failed to set INFO_GUARD"))?;
        ERROR_GUARD
            .set(error_guard)
            .map_err(|_| anyhow::anyhow!("Failed to set ERROR_GUARD"))?;

        let console = config.enable_console_logging.then(|| {
            fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_level(true)
                .with_writer(std::io::stdout)
                .with_filter(EnvFilter::new(&config.log_level))
        });

        let subscriber = Registry::default()
            .with(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_level(true)
                    .with_writer(info_non_blocking)
                    .with_filter(EnvFilter::new(&config.log_level)),
            )
            .with(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_level(true)
                    .with_writer(error_non_blocking)
                    .with_filter(EnvFilter::new("error")),
            )
            // Option<Layer> 本身也是 Layer，关闭控制台时为 None
            .with(console);

        tracing::subscriber::set_global_default(subscriber)?;
    }

    // rbatis 通过 log crate 输出 SQL，需要单独开启
    if config.db_debug {
        fast_log::init(fast_log::Config::new().console().level(log::LevelFilter::Debug))
            .map_err(|e| anyhow::anyhow!("fast_log init error: {}", e))?;
    }

    info!("Log configuration setup successfully!");
    info!(
        "Environment: {}, Log Level: {}, Console Logging: {}, DB Debug: {}",
        config.app_env, config.log_level, config.enable_console_logging, config.db_debug
    );
    Ok(())
}
