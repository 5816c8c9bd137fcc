//! 错误处理模块

pub mod app_error;

pub use app_error::AppError;
