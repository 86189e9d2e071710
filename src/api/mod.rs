pub mod client;

use crate::capability::{CapabilityReport, ThreadProfile};
use crate::error::{FieldViolation, NetworkError};
use crate::mining::{CoinDescriptor, MiningConfiguration, MiningMode, MiningStatus};
use crate::monitoring::SystemSnapshot;
use crate::validation::PortInput;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use client::HttpBackend;

/// 后端拉取接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BackendApi: Send + Sync + 'static {
    /// GET /api/health
    async fn health(&self) -> Result<HealthStatus, NetworkError>;
    /// GET /api/mining/status
    async fn mining_status(&self) -> Result<MiningStatus, NetworkError>;
    /// GET /api/system/stats
    async fn system_stats(&self) -> Result<SystemSnapshot, NetworkError>;
    /// GET /api/system/cpu-info
    async fn cpu_info(&self) -> Result<CapabilityReport, NetworkError>;
    /// POST /api/mining/start
    async fn start_mining(&self, request: &StartMiningRequest) -> Result<CommandReply, NetworkError>;
    /// POST /api/mining/stop
    async fn stop_mining(&self) -> Result<CommandReply, NetworkError>;
}

/// 健康检查响应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        let status_ok = matches!(self.status.to_ascii_lowercase().as_str(), "healthy" | "ok");
        let database_ok = self
            .database
            .as_deref()
            .map_or(true, |db| !db.eq_ignore_ascii_case("disconnected"));
        status_ok && database_ok
    }
}

/// 启动挖矿请求体
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StartMiningRequest {
    pub coin: CoinDescriptor,
    pub mode: MiningMode,
    pub threads: u32,
    pub intensity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_rpc_host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_rpc_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_stratum_host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_stratum_port: Option<u16>,
    pub ai_enabled: bool,
    pub auto_thread_detection: bool,
    pub thread_profile: ThreadProfile,
}

impl StartMiningRequest {
    /// 从配置构建请求；没有币种时返回 `None`
    ///
    /// 无法解析的端口直接省略。
    pub fn from_config(config: &MiningConfiguration) -> Option<Self> {
        let coin = config.coin.clone()?;
        let non_empty = |s: &str| {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        };
        let endpoint = config.custom_endpoint.clone().unwrap_or_default();

        let (wallet_address, pool_username, pool_password) = match config.mode {
            MiningMode::Solo => (non_empty(&config.wallet_address), None, None),
            MiningMode::Pool => (
                non_empty(&config.wallet_address),
                non_empty(&config.pool_username),
                Some(config.pool_password.clone()),
            ),
        };

        Some(Self {
            coin,
            mode: config.mode,
            threads: config.threads,
            intensity: config.intensity,
            wallet_address,
            pool_username,
            pool_password,
            custom_rpc_host: endpoint.rpc_host.as_deref().and_then(non_empty),
            custom_rpc_port: PortInput::parse(endpoint.rpc_port.as_deref()).value(),
            custom_stratum_host: endpoint.stratum_host.as_deref().and_then(non_empty),
            custom_stratum_port: PortInput::parse(endpoint.stratum_port.as_deref()).value(),
            ai_enabled: config.ai_enabled,
            auto_thread_detection: config.auto_thread_detection,
            thread_profile: config.thread_profile,
        })
    }
}

/// 启停命令的成功响应体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

/// 后端拒绝详情
#[derive(Debug, Clone, PartialEq)]
pub enum RejectionDetail {
    Fields(Vec<FieldViolation>),
    Message(String),
}

/// 后端对启停命令的答复
#[derive(Debug, Clone, PartialEq)]
pub enum CommandReply {
    Accepted { message: String },
    Rejected(RejectionDetail),
}

impl CommandReply {
    /// 解析错误响应体 `{detail: [...] | string}` / `{message}`
    pub fn from_error_body(status_code: u16, body: &str) -> Self {
        let parsed: Option<Value> = serde_json::from_str(body).ok();
        let detail = parsed.as_ref().and_then(|v| v.get("detail"));

        let rejection = match detail {
            Some(Value::Array(items)) if !items.is_empty() => {
                RejectionDetail::Fields(items.iter().map(violation_from_detail).collect())
            }
            Some(Value::String(message)) => RejectionDetail::Message(message.clone()),
            _ => {
                let message = parsed
                    .as_ref()
                    .and_then(|v| v.get("message").or_else(|| v.get("error")))
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("backend returned HTTP {}", status_code));
                RejectionDetail::Message(message)
            }
        };

        CommandReply::Rejected(rejection)
    }
}

impl From<CommandResponse> for CommandReply {
    fn from(response: CommandResponse) -> Self {
        if response.success {
            CommandReply::Accepted { message: response.message }
        } else {
            let message = if response.message.is_empty() {
                "backend reported failure".to_string()
            } else {
                response.message
            };
            CommandReply::Rejected(RejectionDetail::Message(message))
        }
    }
}

// {"loc": ["body", "threads"], "msg": "..."} 或纯字符串
fn violation_from_detail(item: &Value) -> FieldViolation {
    if let Some(text) = item.as_str() {
        return FieldViolation::new("request", text);
    }

    let field = item
        .get("loc")
        .and_then(Value::as_array)
        .and_then(|loc| {
            loc.iter()
                .filter_map(Value::as_str)
                .filter(|part| *part != "body")
                .last()
        })
        .or_else(|| item.get("field").and_then(Value::as_str))
        .unwrap_or("request");
    let reason = item
        .get("msg")
        .or_else(|| item.get("message"))
        .and_then(Value::as_str)
        .unwrap_or("invalid value");

    FieldViolation::new(field, reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mining::CustomEndpoint;

    fn config() -> MiningConfiguration {
        MiningConfiguration {
            coin: Some(CoinDescriptor {
                name: "Litecoin".to_string(),
                symbol: "LTC".to_string(),
                algorithm: "scrypt".to_string(),
                default_port: None,
            }),
            mode: MiningMode::Pool,
            pool_username: "worker.1".to_string(),
            pool_password: "x".to_string(),
            custom_endpoint: Some(CustomEndpoint {
                rpc_host: Some(" ".to_string()),
                rpc_port: Some("abc".to_string()),
                stratum_host: Some("pool.example.com".to_string()),
                stratum_port: Some("3333".to_string()),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_start_request_omits_bad_port() {
        let request = StartMiningRequest::from_config(&config()).unwrap();
        assert_eq!(request.custom_rpc_port, None);
        assert_eq!(request.custom_rpc_host, None);
        assert_eq!(request.custom_stratum_port, Some(3333));
        assert_eq!(request.pool_username.as_deref(), Some("worker.1"));

        let body = serde_json::to_value(&request).unwrap();
        assert!(body.get("custom_rpc_port").is_none());
        assert_eq!(body["mode"], "pool");
        assert_eq!(body["coin"]["symbol"], "LTC");
    }

    #[test]
    fn test_start_request_requires_coin() {
        let config = MiningConfiguration { coin: None, ..config() };
        assert!(StartMiningRequest::from_config(&config).is_none());
    }

    #[test]
    fn test_error_body_field_detail() {
        let body = r#"{"detail": [{"loc": ["body", "threads"], "msg": "too many threads"},
            "wallet looks wrong"]}"#;
        assert_eq!(
            CommandReply::from_error_body(422, body),
            CommandReply::Rejected(RejectionDetail::Fields(vec![
                FieldViolation::new("threads", "too many threads"),
                FieldViolation::new("request", "wallet looks wrong"),
            ]))
        );
    }

    #[test]
    fn test_error_body_message_detail() {
        assert_eq!(
            CommandReply::from_error_body(400, r#"{"detail": "Mining already running"}"#),
            CommandReply::Rejected(RejectionDetail::Message("Mining already running".to_string()))
        );
        assert_eq!(
            CommandReply::from_error_body(502, "<html>bad gateway</html>"),
            CommandReply::Rejected(RejectionDetail::Message("backend returned HTTP 502".to_string()))
        );
    }

    #[test]
    fn test_command_response_failure() {
        let reply = CommandReply::from(CommandResponse { success: false, message: String::new() });
        assert_eq!(
            reply,
            CommandReply::Rejected(RejectionDetail::Message("backend reported failure".to_string()))
        );
    }

    #[test]
    fn test_health_status() {
        let health: HealthStatus =
            serde_json::from_str(r#"{"status": "healthy", "database": "connected"}"#).unwrap();
        assert!(health.is_healthy());

        let health = HealthStatus {
            status: "healthy".to_string(),
            backend: None,
            database: Some("disconnected".to_string()),
        };
        assert!(!health.is_healthy());
    }
}
