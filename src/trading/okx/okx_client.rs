use std::fmt::{Debug, Formatter};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use tracing::debug;

use crate::error::app_error::AppError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// OKX 私有接口凭证
#[derive(Clone)]
pub struct OkxCredentials {
    pub api_key: String,
    pub api_secret: String,
    pub passphrase: String,
    /// 模拟盘请求需要带 `x-simulated-trading: 1`
    pub simulated_trading: bool,
}

impl Debug for OkxCredentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OkxCredentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"***")
            .field("passphrase", &"***")
            .field("simulated_trading", &self.simulated_trading)
            .finish()
    }
}

#[derive(Deserialize)]
struct ErrorResponse {
    code: String,
    msg: String,
}

pub struct OkxClient {
    client: Client,
    base_url: String,
    credentials: Option<OkxCredentials>,
}

impl OkxClient {
    pub fn new(base_url: &str, credentials: Option<OkxCredentials>) -> Result<Self, AppError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(OkxClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    /// 签名：base64(hmac_sha256(timestamp + method + path + body))
    pub fn generate_signature(
        secret: &str,
        timestamp: &str,
        method: &Method,
        path: &str,
        body: &str,
    ) -> Result<String, AppError> {
        let sign_payload = format!("{}{}{}{}", timestamp, method.as_str(), path, body);
        let mut hmac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .map_err(|e| AppError::ConfigError(format!("OKX_API_SECRET 无效: {}", e)))?;
        hmac.update(sign_payload.as_bytes());
        Ok(STANDARD.encode(hmac.finalize().into_bytes()))
    }

    /// 公共接口，不需要签名
    pub async fn get_public<T: DeserializeOwned>(&self, path: &str) -> Result<T, AppError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).send().await?;
        Self::parse_response(path, response).await
    }

    /// 私有接口（下单、平仓）
    pub async fn send_signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &str,
    ) -> Result<T, AppError> {
        let credentials = self.credentials.as_ref().ok_or_else(|| {
            AppError::ConfigError("未配置 OKX_API_KEY / OKX_API_SECRET / OKX_PASSPHRASE".to_string())
        })?;

        let timestamp = chrono::Utc::now()
            .format("%Y-%m-%dT%H:%M:%S%.3fZ")
            .to_string();
        let signature =
            Self::generate_signature(&credentials.api_secret, &timestamp, &method, path, body)?;

        // expTime: 请求有效截止时间（毫秒时间戳）
        let exp_time = chrono::Utc::now().timestamp_millis() + 5_000;

        let url = format!("{}{}", self.base_url, path);
        let mut request_builder = self
            .client
            .request(method, &url)
            .header("OK-ACCESS-KEY", &credentials.api_key)
            .header("OK-ACCESS-SIGN", signature)
            .header("OK-ACCESS-TIMESTAMP", timestamp)
            .header("OK-ACCESS-PASSPHRASE", &credentials.passphrase)
            .header("Content-Type", "application/json")
            .header("expTime", exp_time.to_string())
            .body(body.to_string());

        if credentials.simulated_trading {
            request_builder = request_builder.header("x-simulated-trading", "1");
        }

        let response = request_builder.send().await?;
        Self::parse_response(path, response).await
    }

    async fn parse_response<T: DeserializeOwned>(
        path: &str,
        response: reqwest::Response,
    ) -> Result<T, AppError> {
        let status_code = response.status();
        let response_body = response.text().await?;
        debug!("path:{}, okx_response: {}", path, response_body);

        if status_code == StatusCode::OK {
            Ok(serde_json::from_str(&response_body)?)
        } else {
            match serde_json::from_str::<ErrorResponse>(&response_body) {
                Ok(error) => Err(AppError::OkxApiError {
                    code: error.code,
                    msg: error.msg,
                }),
                Err(_) => Err(AppError::NetworkError(format!(
                    "{} 请求失败: status={}, body={}",
                    path, status_code, response_body
                ))),
            }
        }
    }
}
