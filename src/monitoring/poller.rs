use crate::api::BackendApi;
use crate::error::NetworkError;
use crate::mining::MiningStatus;
use crate::monitoring::SystemSnapshot;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

/// 参考轮询周期
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// 一次轮询的结果；两个端点各自成功或失败
#[derive(Debug, Clone)]
pub struct PollReport {
    pub status: Result<MiningStatus, NetworkError>,
    pub system: Result<SystemSnapshot, NetworkError>,
}

impl PollReport {
    /// 两个端点都失败，通常意味着后端不可达
    pub fn is_complete_failure(&self) -> bool {
        self.status.is_err() && self.system.is_err()
    }
}

/// 快照轮询器
///
/// 与推送通道健康与否无关，按固定周期拉取权威状态。
pub struct SnapshotPoller {
    backend: Arc<dyn BackendApi>,
    /// 轮询周期
    poll_interval: Duration,
    /// 单次轮询的超时窗口
    poll_timeout: Duration,
    stats: Arc<RwLock<PollerStats>>,
    task_handle: Mutex<Option<JoinHandle<()>>>,
}

impl SnapshotPoller {
    pub fn new(backend: Arc<dyn BackendApi>, poll_interval: Duration) -> Self {
        Self::with_timeout(backend, poll_interval, poll_interval)
    }

    pub fn with_timeout(backend: Arc<dyn BackendApi>, poll_interval: Duration, poll_timeout: Duration) -> Self {
        Self {
            backend,
            poll_interval,
            poll_timeout,
            stats: Arc::new(RwLock::new(PollerStats::default())),
            task_handle: Mutex::new(None),
        }
    }

    /// 立即拉取一次状态与系统快照
    pub async fn poll(&self) -> PollReport {
        poll_once(self.backend.as_ref(), self.poll_timeout, &self.stats).await
    }

    /// 启动周期轮询，结果送入 `sink`
    pub fn start(&self, sink: mpsc::UnboundedSender<PollReport>) {
        let mut handle = self.task_handle.lock().unwrap_or_else(|e| e.into_inner());
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            warn!("Snapshot poller is already running");
            return;
        }

        let backend = self.backend.clone();
        let poll_interval = self.poll_interval;
        let poll_timeout = self.poll_timeout;
        let stats = self.stats.clone();

        info!("Starting snapshot poller, interval {:?}", poll_interval);
        *handle = Some(tokio::spawn(async move {
            let mut ticker = interval(poll_interval);
            // 失败后不补发，等下一个周期
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let report = poll_once(backend.as_ref(), poll_timeout, &stats).await;
                if sink.send(report).is_err() {
                    debug!("Poll report receiver dropped, stopping poller");
                    break;
                }
            }
        }));
    }

    /// 取消待执行的轮询
    pub fn stop(&self) {
        if let Some(handle) = self.task_handle.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
            info!("Snapshot poller stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task_handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    pub async fn get_stats(&self) -> PollerStats {
        self.stats.read().await.clone()
    }
}

impl Drop for SnapshotPoller {
    fn drop(&mut self) {
        if let Some(handle) = self.task_handle.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
    }
}

async fn poll_once(
    backend: &dyn BackendApi,
    poll_timeout: Duration,
    stats: &RwLock<PollerStats>,
) -> PollReport {
    let fetch = async { tokio::join!(backend.mining_status(), backend.system_stats()) };

    let report = match timeout(poll_timeout, fetch).await {
        Ok((status, system)) => PollReport { status, system },
        Err(_) => {
            let error = NetworkError::Timeout {
                url: format!("poll window {:?}", poll_timeout),
            };
            PollReport {
                status: Err(error.clone()),
                system: Err(error),
            }
        }
    };

    let mut stats = stats.write().await;
    stats.total_polls += 1;
    if report.status.is_err() {
        stats.failed_status_polls += 1;
    }
    if report.system.is_err() {
        stats.failed_system_polls += 1;
    }

    if report.is_complete_failure() {
        stats.unreachable_polls += 1;
        if let Err(e) = &report.status {
            warn!("Backend unreachable, keeping last known state: {}", e);
        }
    } else {
        if let Err(e) = &report.status {
            warn!("Mining status poll failed: {}", e);
        }
        if let Err(e) = &report.system {
            warn!("System stats poll failed: {}", e);
        }
    }

    report
}

/// 轮询统计
#[derive(Debug, Clone, Default)]
pub struct PollerStats {
    pub total_polls: u64,
    pub failed_status_polls: u64,
    pub failed_system_polls: u64,
    /// 两个端点同时失败的次数
    pub unreachable_polls: u64,
}
