//! 日志系统

use crate::error::ConfigError;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// 日志配置
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// 日志级别
    pub level: String,
    /// 日志文件路径
    pub file_path: Option<PathBuf>,
    /// 是否启用彩色输出
    pub colored: bool,
    /// 是否显示线程ID
    pub show_thread_id: bool,
    /// 是否显示目标模块
    pub show_target: bool,
    /// 日志轮转配置
    pub rotation: LogRotation,
}

/// 日志轮转配置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogRotation {
    /// 不轮转
    Never,
    /// 每小时轮转
    Hourly,
    /// 每天轮转
    #[default]
    Daily,
}

impl FromStr for LogRotation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "never" => Ok(LogRotation::Never),
            "hourly" => Ok(LogRotation::Hourly),
            "daily" => Ok(LogRotation::Daily),
            other => Err(format!("unknown rotation: {}", other)),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_path: None,
            colored: true,
            show_thread_id: false,
            show_target: false,
            rotation: LogRotation::Daily,
        }
    }
}

/// 构建过滤器：`RUST_LOG` 优先，否则使用配置级别
pub fn build_filter(level: &str) -> EnvFilter {
    let level = match level.to_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    };

    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("cgminer_dashboard={}", level)))
}

/// 初始化日志系统
///
/// 启用文件输出时返回写入线程的 guard，调用方需持有到退出。
pub fn init_logging(config: LogConfig) -> Result<Option<WorkerGuard>, ConfigError> {
    let registry = tracing_subscriber::registry().with(build_filter(&config.level));

    // 控制台输出层
    let console_layer = fmt::layer()
        .with_ansi(config.colored)
        .with_target(config.show_target)
        .with_thread_ids(config.show_thread_id)
        .boxed();

    let init_error = |e: tracing_subscriber::util::TryInitError| ConfigError::ValidationError {
        field: "logging".to_string(),
        reason: e.to_string(),
    };

    // 文件输出层
    let Some(file_path) = config.file_path else {
        registry.with(console_layer).try_init().map_err(init_error)?;
        return Ok(None);
    };

    let directory = file_path.parent().unwrap_or(Path::new("."));
    let file_name = file_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("cgminer-dashboard.log");

    let (writer, guard) = match config.rotation {
        LogRotation::Never => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&file_path)
                .map_err(|e| ConfigError::ValidationError {
                    field: "logging.file".to_string(),
                    reason: format!("Failed to open log file: {}", e),
                })?;
            non_blocking(file)
        }
        LogRotation::Hourly => non_blocking(rolling::hourly(directory, file_name)),
        LogRotation::Daily => non_blocking(rolling::daily(directory, file_name)),
    };

    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .json();

    registry
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(init_error)?;

    Ok(Some(guard))
}
