//! 推送通道
//!
//! 与后端之间的单一逻辑推送通道：消息格式、连接状态机与传输抽象。

pub mod connection;
pub mod transport;

use crate::error::NetworkError;
use crate::mining::{MiningStatsFields, MiningStatus};
use crate::monitoring::SystemSnapshot;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub use connection::{ChannelEvents, ConnectionManager, ConnectionStats};
pub use transport::WebSocketTransport;

/// 参考重连间隔
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// 推送通道消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushMessage {
    /// 挖矿状态更新
    MiningUpdate { is_mining: bool, stats: MiningStatsFields },
    /// 系统资源更新
    SystemUpdate { data: SystemSnapshot },
    /// 未识别的类型（向前兼容，忽略）
    #[serde(other)]
    Unknown,
}

impl PushMessage {
    /// 解码一帧文本；未识别的类型返回 `Ok(None)`
    pub fn decode(text: &str) -> Result<Option<PushMessage>, serde_json::Error> {
        match serde_json::from_str::<PushMessage>(text)? {
            PushMessage::Unknown => Ok(None),
            message => Ok(Some(message)),
        }
    }

    pub fn into_mining_status(self) -> Option<MiningStatus> {
        match self {
            PushMessage::MiningUpdate { is_mining, stats } => {
                Some(MiningStatus::from_parts(is_mining, stats))
            }
            _ => None,
        }
    }
}

/// 通道向订阅者发出的事件
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// 通道(重新)建立，对账器应丢弃旧的陈旧性假设
    Reset,
    Message(PushMessage),
}

/// 连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// 一次连接尝试刚刚失败；安排重连后回到 `Disconnected`
    Errored,
}

/// 状态机输入
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    AttemptStarted,
    Opened,
    AttemptFailed,
    RetryScheduled,
    ChannelLost,
    Closed,
}

impl ConnectionState {
    /// 唯一的状态转换表
    pub fn on(self, event: ConnectionEvent) -> ConnectionState {
        use ConnectionEvent::*;
        use ConnectionState::*;

        match (self, event) {
            (_, Closed) => Disconnected,
            (Disconnected | Errored, AttemptStarted) => Connecting,
            (Connecting, Opened) => Connected,
            (Connecting, AttemptFailed) => Errored,
            (Errored, RetryScheduled) => Disconnected,
            (Connected, ChannelLost) => Disconnected,
            (state, _) => state,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Errored => "error",
        };
        f.write_str(s)
    }
}

/// 重连策略：固定间隔，无退避，无次数上限
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
}

impl ReconnectPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self { delay }
    }

    /// 下一次连接尝试前的等待时间（与失败次数无关）
    pub fn next_delay(&self) -> Duration {
        self.delay
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_RECONNECT_DELAY)
    }
}

/// 一条已建立通道上的文本帧流；流结束即通道关闭
pub type PushStream = BoxStream<'static, Result<String, NetworkError>>;

/// 推送通道传输
#[async_trait]
pub trait PushTransport: Send + Sync + 'static {
    async fn open(&self, url: &str) -> Result<PushStream, NetworkError>;
}
