//! 硬件能力归一化
//!
//! 把后端 `/api/system/cpu-info` 上报的原始硬件能力（核心数、内存、
//! 推荐线程区间、显式上限）转换为有界、单调的 [`ResourceEnvelope`]。
//! 纯函数，无 I/O，无隐藏状态。

use serde::{Deserialize, Serialize};
use tracing::debug;

/// 线程数硬上限，防止畸形上报
pub const MAX_THREAD_CEILING: u32 = 250_000;

/// 低于等于该值的线程数视为"未调整过的默认值"
pub const TRIVIAL_THREAD_DEFAULT: u32 = 4;

/// 推荐线程区间
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecommendedThreads {
    #[serde(default)]
    pub min: Option<u64>,
    #[serde(default)]
    pub max: Option<u64>,
    #[serde(default)]
    pub optimal: Option<u64>,
}

/// 原始硬件能力上报
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityReport {
    #[serde(default, alias = "cores", alias = "logical")]
    pub logical_cores: Option<u64>,
    #[serde(default, alias = "physical")]
    pub physical_cores: Option<u64>,
    #[serde(default, alias = "memory_gb", alias = "total_memory")]
    pub total_memory_gb: Option<f64>,
    #[serde(default)]
    pub recommended_threads: Option<RecommendedThreads>,
    /// 显式最大线程数（优先级最高）
    #[serde(default, alias = "max_threads")]
    pub max_safe_threads: Option<u64>,
}

/// 线程档位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadProfile {
    Conservative,
    #[default]
    Balanced,
    Aggressive,
    Maximum,
    /// 操作员手动指定线程数
    Custom,
}

impl ThreadProfile {
    pub fn name(&self) -> &'static str {
        match self {
            ThreadProfile::Conservative => "conservative",
            ThreadProfile::Balanced => "balanced",
            ThreadProfile::Aggressive => "aggressive",
            ThreadProfile::Maximum => "maximum",
            ThreadProfile::Custom => "custom",
        }
    }
}

impl std::str::FromStr for ThreadProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "conservative" => Ok(ThreadProfile::Conservative),
            "balanced" => Ok(ThreadProfile::Balanced),
            "aggressive" => Ok(ThreadProfile::Aggressive),
            "maximum" | "max" => Ok(ThreadProfile::Maximum),
            "custom" => Ok(ThreadProfile::Custom),
            other => Err(format!("unknown thread profile: {}", other)),
        }
    }
}

/// 命名预设
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ThreadPreset {
    pub profile: ThreadProfile,
    pub threads: u32,
}

impl ThreadPreset {
    pub fn name(&self) -> &'static str {
        self.profile.name()
    }
}

/// 资源包络：安全线程区间与预设
///
/// 构造后不可变；新的能力上报到来时整体替换。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceEnvelope {
    logical_cores: u32,
    max_safe_threads: u32,
    presets: Vec<ThreadPreset>,
    total_memory_gb: f64,
}

impl ResourceEnvelope {
    /// 从原始上报归一化
    pub fn normalize(report: &CapabilityReport) -> Self {
        let logical_cores = report
            .logical_cores
            .unwrap_or(1)
            .clamp(1, MAX_THREAD_CEILING as u64) as u32;

        let recommended_max = report.recommended_threads.as_ref().and_then(|r| r.max);
        let max_safe_threads = report
            .max_safe_threads
            .or(recommended_max)
            .unwrap_or(logical_cores as u64)
            .min(MAX_THREAD_CEILING as u64)
            .max(logical_cores as u64) as u32;

        let total_memory_gb = report
            .total_memory_gb
            .filter(|gb| gb.is_finite() && *gb >= 0.0)
            .unwrap_or(0.0);

        let fraction = |num: u64, den: u64| -> u32 {
            ((logical_cores as u64 * num / den) as u32).clamp(1, max_safe_threads)
        };

        let presets = vec![
            ThreadPreset { profile: ThreadProfile::Conservative, threads: fraction(1, 4) },
            ThreadPreset { profile: ThreadProfile::Balanced, threads: fraction(1, 2) },
            ThreadPreset { profile: ThreadProfile::Aggressive, threads: fraction(3, 4) },
            ThreadPreset { profile: ThreadProfile::Maximum, threads: max_safe_threads },
        ];

        debug!(
            "Normalized capability report: logical_cores={}, max_safe_threads={}, presets={:?}",
            logical_cores,
            max_safe_threads,
            presets.iter().map(|p| p.threads).collect::<Vec<_>>()
        );

        Self {
            logical_cores,
            max_safe_threads,
            presets,
            total_memory_gb,
        }
    }

    pub fn logical_cores(&self) -> u32 {
        self.logical_cores
    }

    pub fn max_safe_threads(&self) -> u32 {
        self.max_safe_threads
    }

    pub fn presets(&self) -> &[ThreadPreset] {
        &self.presets
    }

    pub fn total_memory_gb(&self) -> f64 {
        self.total_memory_gb
    }

    /// 档位对应的线程数（`Custom` 没有预设）
    pub fn threads_for(&self, profile: ThreadProfile) -> Option<u32> {
        self.presets
            .iter()
            .find(|p| p.profile == profile)
            .map(|p| p.threads)
    }

    pub fn allows(&self, threads: u32) -> bool {
        (1..=self.max_safe_threads).contains(&threads)
    }

    /// 把任意请求值夹到 [1, max_safe_threads]
    pub fn clamp_threads(&self, threads: u32) -> u32 {
        threads.clamp(1, self.max_safe_threads)
    }

    /// 自动线程检测的建议值
    ///
    /// 仅当当前值仍是平凡默认值且开启自动检测时给出 balanced 预设；
    /// 只是建议，由调用方决定是否应用。
    pub fn suggest_threads(&self, current_threads: u32, auto_detection: bool) -> Option<u32> {
        if auto_detection && current_threads <= TRIVIAL_THREAD_DEFAULT {
            self.threads_for(ThreadProfile::Balanced)
        } else {
            None
        }
    }
}
