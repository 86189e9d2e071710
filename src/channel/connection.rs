use crate::channel::{
    ChannelEvent, ConnectionEvent, ConnectionState, PushMessage, PushTransport, ReconnectPolicy,
};
use futures::StreamExt;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use tokio::sync::{broadcast, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// 推送通道连接管理器
///
/// 连接状态的唯一写入者。断线后按固定间隔无限重连，直到 [`close`](Self::close)。
pub struct ConnectionManager {
    /// 推送通道地址
    url: String,
    /// 传输实现
    transport: Arc<dyn PushTransport>,
    /// 重连策略
    policy: ReconnectPolicy,
    /// 连接状态
    state: Arc<watch::Sender<ConnectionState>>,
    /// 事件广播
    event_sender: broadcast::Sender<ChannelEvent>,
    /// 连接统计
    stats: Arc<RwLock<ConnectionStats>>,
    /// 连接循环任务句柄
    task_handle: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// 创建新的连接管理器（不立即连接）
    pub fn new(url: impl Into<String>, transport: Arc<dyn PushTransport>, policy: ReconnectPolicy) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (event_sender, _) = broadcast::channel(1000);

        Self {
            url: url.into(),
            transport,
            policy,
            state: Arc::new(state),
            event_sender,
            stats: Arc::new(RwLock::new(ConnectionStats::default())),
            task_handle: Mutex::new(None),
        }
    }

    /// 建立推送通道并启动自动重连
    pub fn open(&self) {
        let mut handle = self.task_handle.lock().unwrap_or_else(|e| e.into_inner());
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            warn!("Push channel is already open: {}", self.url);
            return;
        }

        let runner = ConnectionLoop {
            url: self.url.clone(),
            transport: self.transport.clone(),
            policy: self.policy,
            state: self.state.clone(),
            event_sender: self.event_sender.clone(),
            stats: self.stats.clone(),
        };
        *handle = Some(tokio::spawn(runner.run()));
    }

    /// 关闭通道并取消待执行的重连
    pub fn close(&self) {
        let handle = self.task_handle.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            handle.abort();
            info!("Push channel closed: {}", self.url);
        }
        transition(&self.state, ConnectionEvent::Closed);
    }

    /// 当前连接状态
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// 只读的连接状态观察者
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// 订阅入站事件；每次调用得到一个新的、从此刻开始的序列
    pub fn messages(&self) -> ChannelEvents {
        ChannelEvents {
            receiver: self.event_sender.subscribe(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// 获取连接统计信息
    pub async fn get_connection_stats(&self) -> ConnectionStats {
        self.stats.read().await.clone()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(handle) = self.task_handle.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
    }
}

/// 连接循环（运行在单独任务中）
struct ConnectionLoop {
    url: String,
    transport: Arc<dyn PushTransport>,
    policy: ReconnectPolicy,
    state: Arc<watch::Sender<ConnectionState>>,
    event_sender: broadcast::Sender<ChannelEvent>,
    stats: Arc<RwLock<ConnectionStats>>,
}

impl ConnectionLoop {
    async fn run(self) {
        let delay = self.policy.next_delay();
        let mut attempt: u64 = 0;

        loop {
            attempt += 1;
            transition(&self.state, ConnectionEvent::AttemptStarted);
            self.stats.write().await.connection_attempts += 1;
            info!("Connecting to push channel: {} (attempt {})", self.url, attempt);

            match self.transport.open(&self.url).await {
                Ok(frames) => {
                    transition(&self.state, ConnectionEvent::Opened);
                    self.stats.write().await.connected_at = Some(SystemTime::now());
                    info!("✅ Push channel connected: {}", self.url);
                    attempt = 0;

                    self.publish(ChannelEvent::Reset);
                    self.pump(frames).await;

                    transition(&self.state, ConnectionEvent::ChannelLost);
                    self.stats.write().await.disconnection_count += 1;
                    info!("Push channel lost: {}, reconnecting in {:?}", self.url, delay);
                }
                Err(e) => {
                    transition(&self.state, ConnectionEvent::AttemptFailed);
                    self.stats.write().await.failed_attempts += 1;
                    warn!(
                        "Push channel connection failed: {} (attempt {}), retrying in {:?}",
                        e, attempt, delay
                    );
                    transition(&self.state, ConnectionEvent::RetryScheduled);
                }
            }

            sleep(delay).await;
        }
    }

    /// 读取帧直到通道关闭或出错
    async fn pump(&self, mut frames: crate::channel::PushStream) {
        while let Some(frame) = frames.next().await {
            let text = match frame {
                Ok(text) => text,
                Err(e) => {
                    warn!("Push channel error: {}", e);
                    return;
                }
            };

            match PushMessage::decode(&text) {
                Ok(Some(message)) => {
                    self.stats.write().await.messages_received += 1;
                    self.publish(ChannelEvent::Message(message));
                }
                Ok(None) => debug!("Ignoring push message of unrecognized type"),
                Err(e) => {
                    self.stats.write().await.malformed_messages += 1;
                    warn!("Dropping malformed push message: {} (payload: {})", e, excerpt(&text));
                }
            }
        }
    }

    fn publish(&self, event: ChannelEvent) {
        if self.event_sender.send(event).is_err() {
            debug!("No subscribers for push channel event");
        }
    }
}

fn transition(state: &watch::Sender<ConnectionState>, event: ConnectionEvent) {
    state.send_if_modified(|current| {
        let next = current.on(event);
        if next == *current {
            return false;
        }
        debug!("Connection state: {} -> {} ({:?})", current, next, event);
        *current = next;
        true
    });
}

fn excerpt(text: &str) -> String {
    const MAX: usize = 120;
    match text.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}

/// 入站事件序列
///
/// 惰性、无限；管理器存活期间不会结束。
pub struct ChannelEvents {
    receiver: broadcast::Receiver<ChannelEvent>,
}

impl ChannelEvents {
    /// 下一个事件；管理器被释放后返回 `None`
    pub async fn next(&mut self) -> Option<ChannelEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Push channel subscriber lagged, {} event(s) skipped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// 连接统计信息
#[derive(Debug, Clone, Default)]
pub struct ConnectionStats {
    pub connection_attempts: u64,
    pub failed_attempts: u64,
    pub disconnection_count: u64,
    pub messages_received: u64,
    pub malformed_messages: u64,
    pub connected_at: Option<SystemTime>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::PushStream;
    use crate::error::NetworkError;
    use async_trait::async_trait;
    use futures::channel::mpsc;
    use std::collections::VecDeque;
    use std::time::Duration;

    type FrameSender = mpsc::UnboundedSender<Result<String, NetworkError>>;

    /// 按脚本返回连接结果；脚本耗尽后连接一直挂起
    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<PushStream, NetworkError>>>,
        opens: Mutex<u32>,
    }

    impl ScriptedTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(VecDeque::new()),
                opens: Mutex::new(0),
            })
        }

        fn push_channel(&self) -> FrameSender {
            let (tx, rx) = mpsc::unbounded();
            self.script.lock().unwrap().push_back(Ok(rx.boxed()));
            tx
        }

        fn push_failure(&self) {
            self.script.lock().unwrap().push_back(Err(NetworkError::ConnectionFailed {
                url: "ws://test".to_string(),
                error: "refused".to_string(),
            }));
        }

        fn opens(&self) -> u32 {
            *self.opens.lock().unwrap()
        }
    }

    #[async_trait]
    impl PushTransport for ScriptedTransport {
        async fn open(&self, _url: &str) -> Result<PushStream, NetworkError> {
            *self.opens.lock().unwrap() += 1;
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(result) => result,
                None => futures::future::pending().await,
            }
        }
    }

    fn manager(transport: Arc<ScriptedTransport>) -> ConnectionManager {
        ConnectionManager::new("ws://test/ws", transport, ReconnectPolicy::default())
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_emits_reset_then_messages() {
        let transport = ScriptedTransport::new();
        let frames = transport.push_channel();
        let manager = manager(transport.clone());
        let mut events = manager.messages();

        manager.open();
        settle().await;
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(events.next().await, Some(ChannelEvent::Reset));

        frames
            .unbounded_send(Ok(r#"{"type":"mining_update","is_mining":true,"stats":{"sequence":1}}"#.to_string()))
            .unwrap();
        match events.next().await {
            Some(ChannelEvent::Message(PushMessage::MiningUpdate { is_mining, .. })) => assert!(is_mining),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_message_keeps_channel_open() {
        let transport = ScriptedTransport::new();
        let frames = transport.push_channel();
        let manager = manager(transport.clone());
        let mut events = manager.messages();
        manager.open();
        settle().await;
        assert_eq!(events.next().await, Some(ChannelEvent::Reset));

        frames.unbounded_send(Ok("{broken".to_string())).unwrap();
        frames.unbounded_send(Ok(r#"{"type":"future_thing"}"#.to_string())).unwrap();
        frames
            .unbounded_send(Ok(r#"{"type":"mining_update","is_mining":false,"stats":{"sequence":2}}"#.to_string()))
            .unwrap();

        match events.next().await {
            Some(ChannelEvent::Message(message)) => {
                assert_eq!(message.into_mining_status().unwrap().sequence, 2);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(manager.state(), ConnectionState::Connected);

        let stats = manager.get_connection_stats().await;
        assert_eq!(stats.malformed_messages, 1);
        assert_eq!(stats.messages_received, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_close_reconnects_after_fixed_delay() {
        let transport = ScriptedTransport::new();
        let frames = transport.push_channel();
        let manager = manager(transport.clone());
        manager.open();
        settle().await;
        assert_eq!(manager.state(), ConnectionState::Connected);

        drop(frames);
        settle().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(transport.opens(), 1);

        tokio::time::advance(Duration::from_millis(4_900)).await;
        settle().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        tokio::time::advance(Duration::from_millis(200)).await;
        settle().await;
        assert_eq!(manager.state(), ConnectionState::Connecting);
        assert_eq!(transport.opens(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_attempt_waits_disconnected_then_retries() {
        let transport = ScriptedTransport::new();
        transport.push_failure();
        transport.push_failure();
        let _frames = transport.push_channel();
        let manager = manager(transport.clone());
        let mut states = manager.watch_state();

        manager.open();
        settle().await;
        // 失败只持续到安排重连为止，等待期间为 Disconnected
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(manager.get_connection_stats().await.failed_attempts, 1);

        tokio::time::advance(Duration::from_millis(4_900)).await;
        settle().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(transport.opens(), 1);

        tokio::time::advance(Duration::from_millis(100)).await;
        settle().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(transport.opens(), 2);

        tokio::time::advance(Duration::from_secs(5)).await;
        settle().await;
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), ConnectionState::Connected);

        let stats = manager.get_connection_stats().await;
        assert_eq!(stats.failed_attempts, 2);
        assert_eq!(stats.connection_attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_pending_reconnect() {
        let transport = ScriptedTransport::new();
        transport.push_failure();
        let manager = manager(transport.clone());
        manager.open();
        settle().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(manager.get_connection_stats().await.failed_attempts, 1);

        manager.close();
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        tokio::time::advance(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(transport.opens(), 1);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_excerpt_truncates() {
        let long = "x".repeat(500);
        assert_eq!(excerpt(&long).chars().count(), 121);
        assert_eq!(excerpt("short"), "short");
    }
}
