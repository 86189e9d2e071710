use crate::capability::ThreadProfile;
use crate::channel::DEFAULT_RECONNECT_DELAY;
use crate::error::ConfigError;
use crate::logging::{LogConfig, LogRotation};
use crate::mining::{CoinDescriptor, CustomEndpoint, MiningConfiguration, MiningMode};
use crate::monitoring::DEFAULT_POLL_INTERVAL;
use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// 覆盖后端地址的环境变量
pub const BACKEND_URL_ENV: &str = "CGMINER_DASHBOARD_URL";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "dashboard.toml")]
    pub config: String,

    /// Backend base URL (overrides config file and environment)
    #[arg(long)]
    pub backend_url: Option<String>,

    /// Log level
    #[arg(long)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Follow live status until Ctrl-C
    Watch,
    /// Poll status and health once
    Status,
    /// Show the resource envelope derived from the backend's hardware report
    Capabilities,
    /// Submit a start command
    Start(StartArgs),
    /// Submit a stop command
    Stop,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct StartArgs {
    /// Coin symbol, e.g. BTC
    #[arg(long)]
    pub coin: String,

    /// Coin display name (defaults to the symbol)
    #[arg(long)]
    pub coin_name: Option<String>,

    /// Hash algorithm
    #[arg(long)]
    pub algorithm: String,

    /// Mining mode: solo or pool
    #[arg(long, default_value = "solo")]
    pub mode: MiningMode,

    /// Thread count
    #[arg(long)]
    pub threads: Option<u32>,

    /// Intensity in (0, 1]
    #[arg(long, default_value_t = 1.0)]
    pub intensity: f64,

    #[arg(long, default_value = "")]
    pub wallet: String,

    #[arg(long, default_value = "")]
    pub pool_user: String,

    #[arg(long, default_value = "")]
    pub pool_password: String,

    #[arg(long)]
    pub rpc_host: Option<String>,

    #[arg(long)]
    pub rpc_port: Option<String>,

    #[arg(long)]
    pub stratum_host: Option<String>,

    #[arg(long)]
    pub stratum_port: Option<String>,

    /// Thread profile: conservative, balanced, aggressive, maximum, custom
    #[arg(long)]
    pub profile: Option<ThreadProfile>,

    /// Let the backend's hardware report pick the thread count
    #[arg(long)]
    pub auto_threads: bool,

    #[arg(long)]
    pub ai: bool,
}

impl StartArgs {
    /// 命令行参数转为本地配置草稿
    pub fn to_configuration(&self) -> MiningConfiguration {
        let defaults = MiningConfiguration::default();
        let has_endpoint = self.rpc_host.is_some()
            || self.rpc_port.is_some()
            || self.stratum_host.is_some()
            || self.stratum_port.is_some();

        MiningConfiguration {
            coin: Some(CoinDescriptor {
                name: self.coin_name.clone().unwrap_or_else(|| self.coin.clone()),
                symbol: self.coin.clone(),
                algorithm: self.algorithm.clone(),
                default_port: None,
            }),
            mode: self.mode,
            threads: self.threads.unwrap_or(defaults.threads),
            intensity: self.intensity,
            wallet_address: self.wallet.clone(),
            pool_username: self.pool_user.clone(),
            pool_password: self.pool_password.clone(),
            custom_endpoint: has_endpoint.then(|| CustomEndpoint {
                rpc_host: self.rpc_host.clone(),
                rpc_port: self.rpc_port.clone(),
                stratum_host: self.stratum_host.clone(),
                stratum_port: self.stratum_port.clone(),
            }),
            ai_enabled: self.ai,
            auto_thread_detection: self.auto_threads,
            thread_profile: self.profile.unwrap_or(if self.threads.is_some() {
                ThreadProfile::Custom
            } else {
                defaults.thread_profile
            }),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DashboardConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
    #[serde(default = "default_push_path")]
    pub push_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// 缺省等于轮询周期
    #[serde(default)]
    pub poll_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub file: Option<PathBuf>,
    /// never / hourly / daily
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_push_path() -> String {
    "/ws".to_string()
}

fn default_reconnect_delay_secs() -> u64 {
    DEFAULT_RECONNECT_DELAY.as_secs()
}

fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL.as_secs()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            push_path: default_push_path(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_secs: default_reconnect_delay_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            poll_timeout_secs: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
            rotation: default_rotation(),
        }
    }
}

impl DashboardConfig {
    pub fn load(path: &str) -> Result<Self> {
        let config_content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: DashboardConfig = toml::from_str(&config_content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        config.validate()?;

        Ok(config)
    }

    /// 文件不存在时使用默认配置
    pub fn load_or_default(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let config_content = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        std::fs::write(path, config_content)
            .with_context(|| format!("Failed to write config file: {}", path))?;

        Ok(())
    }

    /// 依次应用环境变量与命令行覆盖（命令行优先）
    pub fn apply_overrides(&mut self, env_url: Option<String>, flag_url: Option<String>) {
        if let Some(url) = flag_url.or(env_url) {
            self.backend.base_url = url;
        }
    }

    pub fn validate(&self) -> Result<()> {
        // 验证后端地址
        let base = Url::parse(&self.backend.base_url)
            .map_err(|e| ConfigError::InvalidValue {
                field: "backend.base_url".to_string(),
                value: self.backend.base_url.clone(),
                reason: e.to_string(),
            })?;
        if !matches!(base.scheme(), "http" | "https") {
            anyhow::bail!("Backend URL must use http or https: {}", self.backend.base_url);
        }

        if !self.backend.push_path.starts_with('/') {
            anyhow::bail!("Push path must start with '/': {}", self.backend.push_path);
        }

        // 验证同步参数
        if self.sync.reconnect_delay_secs == 0 {
            anyhow::bail!("Reconnect delay must be greater than 0");
        }
        if self.sync.poll_interval_secs == 0 {
            anyhow::bail!("Poll interval must be greater than 0");
        }
        if let Some(timeout) = self.sync.poll_timeout_secs {
            if timeout == 0 || timeout > self.sync.poll_interval_secs {
                anyhow::bail!(
                    "Poll timeout {} is out of range (1-{})",
                    timeout,
                    self.sync.poll_interval_secs
                );
            }
        }

        // 验证日志配置
        if !matches!(
            self.logging.level.to_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            anyhow::bail!("Unknown log level: {}", self.logging.level);
        }
        self.log_rotation()?;

        Ok(())
    }

    /// 检查配置是否有效
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// 推送通道地址：http→ws，https→wss
    pub fn push_url(&self) -> Result<String, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidValue {
            field: "backend.base_url".to_string(),
            value: self.backend.base_url.clone(),
            reason,
        };

        let mut url = Url::parse(&self.backend.base_url).map_err(|e| invalid(e.to_string()))?;
        let scheme = match url.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => return Err(invalid(format!("unsupported scheme {}", other))),
        };
        url.set_scheme(scheme)
            .map_err(|_| invalid(format!("cannot switch to {}", scheme)))?;
        url.set_path(&self.backend.push_path);
        url.set_query(None);

        Ok(url.to_string())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.sync.reconnect_delay_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.sync.poll_interval_secs)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.sync.poll_timeout_secs.unwrap_or(self.sync.poll_interval_secs))
    }

    fn log_rotation(&self) -> Result<LogRotation, ConfigError> {
        self.logging.rotation.parse().map_err(|reason| ConfigError::InvalidValue {
            field: "logging.rotation".to_string(),
            value: self.logging.rotation.clone(),
            reason,
        })
    }

    /// 日志配置；`level_override` 来自命令行
    pub fn log_config(&self, level_override: Option<&str>) -> LogConfig {
        LogConfig {
            level: level_override.unwrap_or(&self.logging.level).to_string(),
            file_path: self.logging.file.clone(),
            rotation: self.log_rotation().unwrap_or_default(),
            ..LogConfig::default()
        }
    }
}
