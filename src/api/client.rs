use crate::api::{BackendApi, CommandReply, CommandResponse, HealthStatus, StartMiningRequest};
use crate::capability::CapabilityReport;
use crate::error::NetworkError;
use crate::mining::{MiningStatus, MiningStatusResponse};
use crate::monitoring::SystemSnapshot;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// 基于 reqwest 的后端客户端
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    /// 不含结尾斜杠的基础地址
    base_url: String,
}

impl HttpBackend {
    /// 使用平台默认超时
    pub fn new(base_url: &str) -> Result<Self, NetworkError> {
        Self::build(base_url, None)
    }

    /// 为每个请求设置硬超时
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, NetworkError> {
        Self::build(base_url, Some(timeout))
    }

    fn build(base_url: &str, timeout: Option<Duration>) -> Result<Self, NetworkError> {
        let parsed = Url::parse(base_url).map_err(|e| NetworkError::InvalidUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(NetworkError::InvalidUrl {
                url: base_url.to_string(),
                reason: format!("unsupported scheme: {}", parsed.scheme()),
            });
        }

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| NetworkError::ConnectionFailed {
            url: base_url.to_string(),
            error: e.to_string(),
        })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, NetworkError> {
        let url = self.endpoint(path);
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| transport_error(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(NetworkError::HttpError {
                status_code: status.as_u16(),
                message,
            });
        }

        response.json::<T>().await.map_err(|e| NetworkError::DecodeError {
            endpoint: path.to_string(),
            error: e.to_string(),
        })
    }

    async fn post_command(
        &self,
        path: &str,
        body: Option<&StartMiningRequest>,
    ) -> Result<CommandReply, NetworkError> {
        let url = self.endpoint(path);
        debug!("POST {}", url);

        let mut request = self.client.post(&url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await.map_err(|e| transport_error(&url, e))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| transport_error(&url, e))?;

        if status.is_success() {
            let reply: CommandResponse =
                serde_json::from_str(&text).map_err(|e| NetworkError::DecodeError {
                    endpoint: path.to_string(),
                    error: e.to_string(),
                })?;
            Ok(reply.into())
        } else {
            command_failure(status, text)
        }
    }
}

/// 非 2xx 命令响应：带 `detail` 的一律视为拒绝；否则 4xx 为拒绝、5xx 为 HTTP 错误
fn command_failure(status: StatusCode, text: String) -> Result<CommandReply, NetworkError> {
    let has_detail = serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|body| body.get("detail").cloned())
        .is_some_and(|detail| match detail {
            Value::Array(items) => !items.is_empty(),
            Value::String(_) => true,
            _ => false,
        });

    if has_detail || status.is_client_error() {
        Ok(CommandReply::from_error_body(status.as_u16(), &text))
    } else {
        Err(NetworkError::HttpError {
            status_code: status.as_u16(),
            message: text,
        })
    }
}

fn transport_error(url: &str, error: reqwest::Error) -> NetworkError {
    if error.is_timeout() {
        NetworkError::Timeout { url: url.to_string() }
    } else {
        NetworkError::ConnectionFailed {
            url: url.to_string(),
            error: error.to_string(),
        }
    }
}

#[async_trait]
impl BackendApi for HttpBackend {
    async fn health(&self) -> Result<HealthStatus, NetworkError> {
        self.get_json("/api/health").await
    }

    async fn mining_status(&self) -> Result<MiningStatus, NetworkError> {
        let response: MiningStatusResponse = self.get_json("/api/mining/status").await?;
        Ok(response.into())
    }

    async fn system_stats(&self) -> Result<SystemSnapshot, NetworkError> {
        self.get_json("/api/system/stats").await
    }

    async fn cpu_info(&self) -> Result<CapabilityReport, NetworkError> {
        self.get_json("/api/system/cpu-info").await
    }

    async fn start_mining(&self, request: &StartMiningRequest) -> Result<CommandReply, NetworkError> {
        self.post_command("/api/mining/start", Some(request)).await
    }

    async fn stop_mining(&self) -> Result<CommandReply, NetworkError> {
        self.post_command("/api/mining/stop", None).await
    }
}
