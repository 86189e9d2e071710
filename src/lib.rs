//! CGMiner Dashboard - 挖矿后端的实时同步客户端
//!
//! 面向长期运行的挖矿后端，提供：
//! - 自动重连的推送通道（固定间隔重试）
//! - 与推送无关的周期快照轮询
//! - 按序号/时间戳对账，得到唯一的当前状态
//! - 由硬件能力推导安全线程范围与预设档位
//! - 配置的本地校验与下发
//!
//! ## 单写者值
//!
//! 连接状态、挖矿状态、系统快照、资源包络、已接受配置各由一个组件写入，
//! 其余组件只持有 [`state::StoreReader`]。

pub mod api;
pub mod capability;
pub mod channel;
pub mod config;
pub mod error;
pub mod logging;
pub mod mining;
pub mod monitoring;
pub mod session;
pub mod state;
pub mod utils;
pub mod validation;

pub use capability::{CapabilityReport, ResourceEnvelope, ThreadProfile};
pub use config::DashboardConfig;
pub use error::{DashboardError, DispatchError, NetworkError};
pub use mining::{MiningConfiguration, MiningStatus};
pub use session::{DashboardSession, SessionOptions};

/// 程序版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 程序名称
pub const NAME: &str = "cgminer-dashboard";
