use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DashboardError {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Session disposed")]
    Disposed,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NetworkError {
    #[error("Connection failed: {url}, error: {error}")]
    ConnectionFailed { url: String, error: String },

    #[error("Connection timeout: {url}")]
    Timeout { url: String },

    #[error("HTTP error: {status_code}, message: {message}")]
    HttpError { status_code: u16, message: String },

    #[error("WebSocket error: {error}")]
    WebSocketError { error: String },

    #[error("Decode error: {endpoint}, error: {error}")]
    DecodeError { endpoint: String, error: String },

    #[error("Invalid URL: {url}, reason: {reason}")]
    InvalidUrl { url: String, reason: String },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Parse error: {error}")]
    ParseError { error: String },

    #[error("Validation error: {field}, reason: {reason}")]
    ValidationError { field: String, reason: String },

    #[error("Invalid value: {field}, value: {value}, reason: {reason}")]
    InvalidValue { field: String, value: String, reason: String },
}

/// 字段级校验问题（本地校验或后端拒绝）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldViolation {
    pub field: String,
    pub reason: String,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

/// 配置下发失败
///
/// 调用方只需处理两种形态：字段问题列表，或单条消息。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    /// 本地校验未通过，未发出任何网络请求
    #[error("Invalid configuration: {}", join_violations(.0))]
    Invalid(Vec<FieldViolation>),

    /// 后端带字段详情拒绝
    #[error("Rejected by backend: {}", join_violations(.0))]
    Rejected(Vec<FieldViolation>),

    /// 网络或后端失败，只有一条消息
    #[error("{0}")]
    Failed(String),
}

impl DispatchError {
    /// 字段问题（单消息形态返回空）
    pub fn violations(&self) -> &[FieldViolation] {
        match self {
            DispatchError::Invalid(v) | DispatchError::Rejected(v) => v,
            DispatchError::Failed(_) => &[],
        }
    }

    /// 统一的用户可读问题列表
    pub fn problems(&self) -> Vec<String> {
        match self {
            DispatchError::Invalid(v) | DispatchError::Rejected(v) => {
                v.iter().map(|v| v.to_string()).collect()
            }
            DispatchError::Failed(message) => vec![message.clone()],
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, DispatchError::Invalid(_))
    }
}

impl From<NetworkError> for DispatchError {
    fn from(error: NetworkError) -> Self {
        DispatchError::Failed(error.to_string())
    }
}

fn join_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
