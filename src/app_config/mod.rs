//! 配置管理：环境变量、日志、数据库、优雅停止

pub mod db;
pub mod env;
pub mod guard;
pub mod log;
pub mod shutdown_manager;

pub use guard::GuardConfig;
pub use shutdown_manager::{ShutdownConfig, ShutdownManager};
