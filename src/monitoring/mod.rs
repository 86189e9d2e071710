pub mod poller;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use poller::{PollReport, PollerStats, SnapshotPoller, DEFAULT_POLL_INTERVAL};

/// 系统资源快照
///
/// 与挖矿状态独立对账，对账键为 `timestamp`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemSnapshot {
    #[serde(alias = "cpu_usage")]
    pub cpu_usage_percent: f64,
    #[serde(alias = "memory_usage")]
    pub memory_usage_percent: f64,
    #[serde(alias = "disk_usage")]
    pub disk_usage_percent: f64,
    pub timestamp: DateTime<Utc>,
}

impl SystemSnapshot {
    /// 任一使用率超过阈值
    pub fn exceeds(&self, threshold_percent: f64) -> bool {
        self.cpu_usage_percent > threshold_percent
            || self.memory_usage_percent > threshold_percent
            || self.disk_usage_percent > threshold_percent
    }
}
