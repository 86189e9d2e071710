//! 配置校验模块
//!
//! 纯函数：给定候选 [`MiningConfiguration`] 与当前 [`ResourceEnvelope`]，
//! 返回通过或字段级问题列表。在任何网络请求之前执行。

use crate::capability::ResourceEnvelope;
use crate::error::FieldViolation;
use crate::mining::{MiningConfiguration, MiningMode};
use tracing::debug;

/// 端口文本解析结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortInput {
    /// 未填写或无法解析（宽松处理，视为未填写）
    Absent,
    Valid(u16),
    /// 是整数，但不是有效端口
    OutOfRange(i64),
}

impl PortInput {
    pub fn parse(raw: Option<&str>) -> Self {
        let raw = match raw.map(str::trim) {
            Some(raw) if !raw.is_empty() => raw,
            _ => return PortInput::Absent,
        };

        match raw.parse::<i64>() {
            Ok(port) if (1..=u16::MAX as i64).contains(&port) => PortInput::Valid(port as u16),
            Ok(port) => PortInput::OutOfRange(port),
            Err(_) => {
                debug!("Ignoring unparsable port value: {:?}", raw);
                PortInput::Absent
            }
        }
    }

    pub fn value(&self) -> Option<u16> {
        match self {
            PortInput::Valid(port) => Some(*port),
            _ => None,
        }
    }
}

/// 配置校验器
pub struct ConfigurationValidator;

impl ConfigurationValidator {
    /// 校验挖矿配置
    ///
    /// 只有结构性必填字段（币种）缺失时短路，其余规则全部收集。
    pub fn validate(
        config: &MiningConfiguration,
        envelope: Option<&ResourceEnvelope>,
    ) -> Result<(), Vec<FieldViolation>> {
        let mut violations = Vec::new();

        // 1. 币种/算法
        let coin = match &config.coin {
            Some(coin) => coin,
            None => {
                return Err(vec![FieldViolation::new("coin", "a coin must be selected")]);
            }
        };
        if coin.algorithm.trim().is_empty() {
            violations.push(FieldViolation::new("coin.algorithm", "algorithm is required"));
        }

        // 2. 矿池模式必须有用户名
        if config.mode == MiningMode::Pool && config.pool_username.trim().is_empty() {
            violations.push(FieldViolation::new(
                "pool_username",
                "pool username is required in pool mode",
            ));
        }

        // 3. 线程数；包络未知时只检查下限
        if config.threads < 1 {
            violations.push(FieldViolation::new("threads", "must be at least 1"));
        } else if let Some(envelope) = envelope {
            if config.threads > envelope.max_safe_threads() {
                violations.push(FieldViolation::new(
                    "threads",
                    format!(
                        "{} is out of range (1-{})",
                        config.threads,
                        envelope.max_safe_threads()
                    ),
                ));
            }
        }

        // 4. 强度
        if !(config.intensity > 0.0 && config.intensity <= 1.0) {
            violations.push(FieldViolation::new(
                "intensity",
                format!("{} is out of range (0, 1]", config.intensity),
            ));
        }

        // 5. 自定义端口
        if let Some(endpoint) = &config.custom_endpoint {
            let ports = [
                ("custom_endpoint.rpc_port", endpoint.rpc_port.as_deref()),
                ("custom_endpoint.stratum_port", endpoint.stratum_port.as_deref()),
            ];
            for (field, raw) in ports {
                if let PortInput::OutOfRange(port) = PortInput::parse(raw) {
                    violations.push(FieldViolation::new(
                        field,
                        format!("{} is not a valid port (1-65535)", port),
                    ));
                }
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            debug!("Configuration rejected with {} violation(s)", violations.len());
            Err(violations)
        }
    }

    /// 检查配置是否有效
    pub fn is_valid(config: &MiningConfiguration, envelope: Option<&ResourceEnvelope>) -> bool {
        Self::validate(config, envelope).is_ok()
    }
}
