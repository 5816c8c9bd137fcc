use thiserror::Error;

/// 应用错误
#[derive(Error, Debug)]
pub enum AppError {
    /// 配置错误（启动阶段直接失败）
    #[error("配置错误: {0}")]
    ConfigError(String),

    /// 数据库错误
    #[error("数据库错误: {0}")]
    DbError(String),

    #[error("OKX API错误: code={code}, msg={msg}")]
    OkxApiError { code: String, msg: String },

    /// 网络错误（REST 超时、websocket 断线）
    #[error("网络错误: {0}")]
    NetworkError(String),

    #[error("序列化错误: {0}")]
    SerdeError(#[from] serde_json::Error),
}

/// 把 rbatis 的错误转换为 AppError
impl From<rbatis::Error> for AppError {
    fn from(err: rbatis::Error) -> Self {
        AppError::DbError(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::NetworkError(err.to_string())
    }
}
