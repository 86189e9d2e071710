//! 仪表盘会话
//!
//! 组装连接管理器、快照轮询器、状态对账器与配置下发器，
//! 并负责整体释放。

use crate::api::{BackendApi, HealthStatus, HttpBackend};
use crate::capability::ResourceEnvelope;
use crate::channel::{ConnectionManager, ConnectionState, PushTransport, ReconnectPolicy, WebSocketTransport};
use crate::config::DashboardConfig;
use crate::error::{DashboardError, NetworkError};
use crate::mining::{
    ConfigurationDispatcher, DispatchCommand, DispatchOutcome, MiningConfiguration, MiningStatus,
};
use crate::monitoring::{PollerStats, SnapshotPoller, SystemSnapshot, DEFAULT_POLL_INTERVAL};
use crate::state::{ReconcilerStats, StateReconciler, StoreReader, ValueStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info};

/// 会话参数
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub push_url: String,
    pub reconnect_delay: Duration,
    pub poll_interval: Duration,
    pub poll_timeout: Duration,
}

impl SessionOptions {
    pub fn new(push_url: impl Into<String>) -> Self {
        Self {
            push_url: push_url.into(),
            reconnect_delay: ReconnectPolicy::default().delay,
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_timeout: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// 一个仪表盘会话
pub struct DashboardSession {
    backend: Arc<dyn BackendApi>,
    connection: ConnectionManager,
    poller: SnapshotPoller,
    reconciler: StateReconciler,
    dispatcher: ConfigurationDispatcher,
    envelope: ValueStore<ResourceEnvelope>,
    /// 串行化能力刷新，后发起的刷新总是后发布
    refresh_lock: Mutex<()>,
    disposed: AtomicBool,
}

impl DashboardSession {
    /// 打开推送通道并开始轮询
    ///
    /// 需要在 tokio 运行时内调用。
    pub fn start(backend: Arc<dyn BackendApi>, transport: Arc<dyn PushTransport>, options: SessionOptions) -> Self {
        info!("Starting dashboard session, push channel {}", options.push_url);

        let connection = ConnectionManager::new(
            options.push_url,
            transport,
            ReconnectPolicy::fixed(options.reconnect_delay),
        );
        let poller = SnapshotPoller::with_timeout(backend.clone(), options.poll_interval, options.poll_timeout);

        // 先订阅再启动，避免丢失首条事件
        let (poll_tx, poll_rx) = mpsc::unbounded_channel();
        let reconciler = StateReconciler::spawn(connection.messages(), poll_rx);
        connection.open();
        poller.start(poll_tx);

        let envelope = ValueStore::new();
        let dispatcher = ConfigurationDispatcher::new(backend.clone(), envelope.reader(), reconciler.mining_status());

        Self {
            backend,
            connection,
            poller,
            reconciler,
            dispatcher,
            envelope,
            refresh_lock: Mutex::new(()),
            disposed: AtomicBool::new(false),
        }
    }

    /// 按配置文件连接真实后端
    pub fn connect(config: &DashboardConfig) -> Result<Self, DashboardError> {
        let backend = HttpBackend::with_timeout(&config.backend.base_url, config.poll_timeout())?;
        let options = SessionOptions {
            push_url: config.push_url()?,
            reconnect_delay: config.reconnect_delay(),
            poll_interval: config.poll_interval(),
            poll_timeout: config.poll_timeout(),
        };

        Ok(Self::start(Arc::new(backend), Arc::new(WebSocketTransport::default()), options))
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.watch_state()
    }

    pub fn mining_status(&self) -> StoreReader<MiningStatus> {
        self.reconciler.mining_status()
    }

    pub fn system_snapshot(&self) -> StoreReader<SystemSnapshot> {
        self.reconciler.system_snapshot()
    }

    pub fn resource_envelope(&self) -> StoreReader<ResourceEnvelope> {
        self.envelope.reader()
    }

    pub fn accepted_configuration(&self) -> StoreReader<MiningConfiguration> {
        self.dispatcher.accepted_configuration()
    }

    /// 拉取硬件能力并替换资源包络
    pub async fn refresh_capabilities(&self) -> Result<Arc<ResourceEnvelope>, DashboardError> {
        self.ensure_live()?;
        let _refresh = self.refresh_lock.lock().await;
        let report = self.backend.cpu_info().await?;
        let envelope = ResourceEnvelope::normalize(&report);
        debug!(
            "Capability report normalized: cores={}, max_safe_threads={}",
            envelope.logical_cores(),
            envelope.max_safe_threads()
        );

        self.ensure_live()?;
        self.envelope.publish(envelope);
        self.envelope.reader().latest().ok_or(DashboardError::Disposed)
    }

    pub async fn health(&self) -> Result<HealthStatus, NetworkError> {
        self.backend.health().await
    }

    /// 下发命令；结果以对账后的状态为准
    pub async fn dispatch(
        &self,
        command: DispatchCommand,
        config: &MiningConfiguration,
    ) -> Result<DispatchOutcome, DashboardError> {
        self.ensure_live()?;
        Ok(self.dispatcher.submit(command, config).await?)
    }

    pub async fn get_reconciler_stats(&self) -> ReconcilerStats {
        self.reconciler.get_stats().await
    }

    pub async fn get_poller_stats(&self) -> PollerStats {
        self.poller.get_stats().await
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// 释放会话：取消重连定时器与轮询定时器，释放对账订阅
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.dispatcher.dispose();
        self.reconciler.dispose();
        self.poller.stop();
        self.connection.close();
        info!("Dashboard session disposed");
    }

    fn ensure_live(&self) -> Result<(), DashboardError> {
        if self.is_disposed() {
            Err(DashboardError::Disposed)
        } else {
            Ok(())
        }
    }
}

impl Drop for DashboardSession {
    fn drop(&mut self) {
        self.dispose();
    }
}
