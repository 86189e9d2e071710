pub mod dispatcher;

use crate::capability::{ResourceEnvelope, ThreadProfile};
use serde::{Deserialize, Serialize};

pub use dispatcher::{ConfigurationDispatcher, DispatchCommand, DispatchOutcome};

/// 挖矿模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MiningMode {
    #[default]
    Solo,
    Pool,
}

impl std::str::FromStr for MiningMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "solo" => Ok(MiningMode::Solo),
            "pool" => Ok(MiningMode::Pool),
            other => Err(format!("unknown mining mode: {}", other)),
        }
    }
}

/// 币种/算法描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinDescriptor {
    pub name: String,
    pub symbol: String,
    pub algorithm: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_port: Option<u16>,
}

/// 自定义节点/矿池地址覆盖
///
/// 端口保留操作员输入的原始文本，下发时才解析。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomEndpoint {
    #[serde(default)]
    pub rpc_host: Option<String>,
    #[serde(default)]
    pub rpc_port: Option<String>,
    #[serde(default)]
    pub stratum_host: Option<String>,
    #[serde(default)]
    pub stratum_port: Option<String>,
}

/// 挖矿配置（操作员意图）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MiningConfiguration {
    pub coin: Option<CoinDescriptor>,
    pub mode: MiningMode,
    pub threads: u32,
    /// 强度，取值 (0, 1]
    pub intensity: f64,
    #[serde(default)]
    pub wallet_address: String,
    #[serde(default)]
    pub pool_username: String,
    #[serde(default)]
    pub pool_password: String,
    #[serde(default)]
    pub custom_endpoint: Option<CustomEndpoint>,
    #[serde(default)]
    pub ai_enabled: bool,
    #[serde(default)]
    pub auto_thread_detection: bool,
    #[serde(default)]
    pub thread_profile: ThreadProfile,
}

impl Default for MiningConfiguration {
    fn default() -> Self {
        Self {
            coin: None,
            mode: MiningMode::Solo,
            threads: 4,
            intensity: 1.0,
            wallet_address: String::new(),
            pool_username: String::new(),
            pool_password: String::new(),
            custom_endpoint: None,
            ai_enabled: false,
            auto_thread_detection: true,
            thread_profile: ThreadProfile::Balanced,
        }
    }
}

impl MiningConfiguration {
    /// 在本地草稿上应用归一化器的线程建议
    pub fn with_suggested_threads(mut self, envelope: &ResourceEnvelope) -> Self {
        if let Some(threads) = envelope.suggest_threads(self.threads, self.auto_thread_detection) {
            self.threads = threads;
        }
        self
    }

    /// 按档位选取预设线程数；`Custom` 保留当前值
    pub fn with_profile(mut self, profile: ThreadProfile, envelope: &ResourceEnvelope) -> Self {
        self.thread_profile = profile;
        if let Some(threads) = envelope.threads_for(profile) {
            self.threads = threads;
        }
        self
    }
}

/// 挖矿统计字段（推送与轮询共用的线上格式）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MiningStatsFields {
    #[serde(default)]
    pub hashrate: f64,
    #[serde(default)]
    pub accepted_shares: u64,
    #[serde(default)]
    pub rejected_shares: u64,
    #[serde(default)]
    pub blocks_found: u64,
    #[serde(default, alias = "uptime")]
    pub uptime_seconds: f64,
    /// 对账键
    pub sequence: u64,
}

/// `/api/mining/status` 响应体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MiningStatusResponse {
    pub is_mining: bool,
    pub stats: MiningStatsFields,
}

/// 挖矿状态快照
///
/// 由对账器整体替换，从不跨来源逐字段修改。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MiningStatus {
    pub is_mining: bool,
    pub hashrate: f64,
    pub accepted_shares: u64,
    pub rejected_shares: u64,
    pub blocks_found: u64,
    pub uptime_seconds: f64,
    pub sequence: u64,
}

impl MiningStatus {
    pub fn from_parts(is_mining: bool, stats: MiningStatsFields) -> Self {
        Self {
            is_mining,
            hashrate: sanitize(stats.hashrate),
            accepted_shares: stats.accepted_shares,
            rejected_shares: stats.rejected_shares,
            blocks_found: stats.blocks_found,
            uptime_seconds: sanitize(stats.uptime_seconds),
            sequence: stats.sequence,
        }
    }

    pub fn get_accept_rate(&self) -> f64 {
        let total_shares = self.accepted_shares + self.rejected_shares;
        if total_shares == 0 {
            0.0
        } else {
            self.accepted_shares as f64 / total_shares as f64 * 100.0
        }
    }

    pub fn get_reject_rate(&self) -> f64 {
        let total_shares = self.accepted_shares + self.rejected_shares;
        if total_shares == 0 {
            0.0
        } else {
            self.rejected_shares as f64 / total_shares as f64 * 100.0
        }
    }
}

impl From<MiningStatusResponse> for MiningStatus {
    fn from(response: MiningStatusResponse) -> Self {
        MiningStatus::from_parts(response.is_mining, response.stats)
    }
}

// 负数和 NaN 视为 0
fn sanitize(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}
