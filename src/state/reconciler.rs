use crate::channel::{ChannelEvent, ChannelEvents, PushMessage};
use crate::error::NetworkError;
use crate::mining::MiningStatus;
use crate::monitoring::{PollReport, SystemSnapshot};
use crate::state::{Sequenced, StoreReader, ValueStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 证据来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Push,
    Poll,
}

/// 对账器输入
#[derive(Debug, Clone)]
pub enum Evidence {
    Status(MiningStatus, Origin),
    System(SystemSnapshot, Origin),
    /// 推送通道(重新)建立
    Reset,
    /// 轮询软失败，不覆盖最后已知的好值
    PollFailed(NetworkError),
}

/// 对账器阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcilerPhase {
    Empty,
    Live,
}

/// 一次 `apply` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    StatusReplaced,
    SystemReplaced,
    Discarded,
    Noted,
}

/// 对账统计
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcilerStats {
    pub status_accepted: u64,
    pub status_discarded: u64,
    pub system_accepted: u64,
    pub system_discarded: u64,
    pub resets: u64,
    pub poll_failures: u64,
    pub last_poll_error: Option<String>,
}

/// 单一类别的持有值
#[derive(Debug)]
struct Slot<T: Sequenced> {
    value: Option<T>,
}

impl<T: Sequenced> Slot<T> {
    fn new() -> Self {
        Self { value: None }
    }

    /// 仅当严格更新时接受；相等或更旧的值丢弃，与来源无关
    fn offer(&mut self, incoming: T) -> bool {
        let accept = match &self.value {
            None => true,
            Some(current) => incoming.ordering_key() > current.ordering_key(),
        };

        if accept {
            self.value = Some(incoming);
        }
        accept
    }
}

/// 对账核心（同步、无 I/O）
///
/// 把推送与轮询两路证据合并为一个挖矿状态和一个系统快照，
/// 只按对账键排序，与到达顺序无关。
#[derive(Debug)]
pub struct Reconciler {
    status: Slot<MiningStatus>,
    system: Slot<SystemSnapshot>,
    stats: ReconcilerStats,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reconciler {
    pub fn new() -> Self {
        Self {
            status: Slot::new(),
            system: Slot::new(),
            stats: ReconcilerStats::default(),
        }
    }

    pub fn apply(&mut self, evidence: Evidence) -> Applied {
        match evidence {
            Evidence::Status(status, origin) => {
                let key = status.sequence;
                if self.status.offer(status) {
                    self.stats.status_accepted += 1;
                    Applied::StatusReplaced
                } else {
                    self.stats.status_discarded += 1;
                    debug!("Discarding stale mining status: sequence={}, origin={:?}", key, origin);
                    Applied::Discarded
                }
            }
            Evidence::System(snapshot, origin) => {
                let key = snapshot.timestamp;
                if self.system.offer(snapshot) {
                    self.stats.system_accepted += 1;
                    Applied::SystemReplaced
                } else {
                    self.stats.system_discarded += 1;
                    debug!("Discarding stale system snapshot: timestamp={}, origin={:?}", key, origin);
                    Applied::Discarded
                }
            }
            Evidence::Reset => {
                // 重连不放宽排序：通道重建期间轮询可能已取得更新的值
                self.stats.resets += 1;
                Applied::Noted
            }
            Evidence::PollFailed(error) => {
                self.stats.poll_failures += 1;
                self.stats.last_poll_error = Some(error.to_string());
                Applied::Noted
            }
        }
    }

    pub fn phase(&self) -> ReconcilerPhase {
        if self.status.value.is_some() || self.system.value.is_some() {
            ReconcilerPhase::Live
        } else {
            ReconcilerPhase::Empty
        }
    }

    pub fn status(&self) -> Option<&MiningStatus> {
        self.status.value.as_ref()
    }

    pub fn system(&self) -> Option<&SystemSnapshot> {
        self.system.value.as_ref()
    }

    pub fn stats(&self) -> &ReconcilerStats {
        &self.stats
    }
}

/// 把一帧推送消息转为证据
fn evidence_from_push(message: PushMessage) -> Option<Evidence> {
    match message {
        PushMessage::MiningUpdate { is_mining, stats } => Some(Evidence::Status(
            MiningStatus::from_parts(is_mining, stats),
            Origin::Push,
        )),
        PushMessage::SystemUpdate { data } => Some(Evidence::System(data, Origin::Push)),
        PushMessage::Unknown => None,
    }
}

/// 把一次轮询结果拆为证据
fn evidence_from_poll(report: PollReport) -> Vec<Evidence> {
    let mut evidence = Vec::with_capacity(2);
    match report.status {
        Ok(status) => evidence.push(Evidence::Status(status, Origin::Poll)),
        Err(e) => evidence.push(Evidence::PollFailed(e)),
    }
    match report.system {
        Ok(snapshot) => evidence.push(Evidence::System(snapshot, Origin::Poll)),
        Err(e) => evidence.push(Evidence::PollFailed(e)),
    }
    evidence
}

/// 运行中的对账器
///
/// 订阅推送事件与轮询结果，是挖矿状态与系统快照的唯一写入者。
/// 释放时只取消自己的订阅，不关闭数据源。
pub struct StateReconciler {
    status: StoreReader<MiningStatus>,
    system: StoreReader<SystemSnapshot>,
    stats: Arc<RwLock<ReconcilerStats>>,
    disposed: Arc<AtomicBool>,
    task_handle: Mutex<Option<JoinHandle<()>>>,
}

impl StateReconciler {
    /// 启动对账任务
    pub fn spawn(events: ChannelEvents, polls: mpsc::UnboundedReceiver<PollReport>) -> Self {
        let status_store = ValueStore::new();
        let system_store = ValueStore::new();
        let status = status_store.reader();
        let system = system_store.reader();
        let stats = Arc::new(RwLock::new(ReconcilerStats::default()));
        let disposed = Arc::new(AtomicBool::new(false));

        let task = ReconcilerTask {
            core: Reconciler::new(),
            status_store,
            system_store,
            stats: stats.clone(),
            disposed: disposed.clone(),
        };
        let handle = tokio::spawn(task.run(events, polls));

        Self {
            status,
            system,
            stats,
            disposed,
            task_handle: Mutex::new(Some(handle)),
        }
    }

    pub fn mining_status(&self) -> StoreReader<MiningStatus> {
        self.status.clone()
    }

    pub fn system_snapshot(&self) -> StoreReader<SystemSnapshot> {
        self.system.clone()
    }

    pub fn phase(&self) -> ReconcilerPhase {
        if self.status.latest().is_some() || self.system.latest().is_some() {
            ReconcilerPhase::Live
        } else {
            ReconcilerPhase::Empty
        }
    }

    pub async fn get_stats(&self) -> ReconcilerStats {
        self.stats.read().await.clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// 释放订阅；之后不再产生任何状态变更
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        if let Some(handle) = self.task_handle.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
            info!("State reconciler disposed");
        }
    }
}

impl Drop for StateReconciler {
    fn drop(&mut self) {
        self.dispose();
    }
}

struct ReconcilerTask {
    core: Reconciler,
    status_store: ValueStore<MiningStatus>,
    system_store: ValueStore<SystemSnapshot>,
    stats: Arc<RwLock<ReconcilerStats>>,
    disposed: Arc<AtomicBool>,
}

impl ReconcilerTask {
    async fn run(mut self, mut events: ChannelEvents, mut polls: mpsc::UnboundedReceiver<PollReport>) {
        let mut push_open = true;
        let mut poll_open = true;

        while push_open || poll_open {
            tokio::select! {
                event = events.next(), if push_open => match event {
                    Some(ChannelEvent::Reset) => self.apply(Evidence::Reset).await,
                    Some(ChannelEvent::Message(message)) => {
                        if let Some(evidence) = evidence_from_push(message) {
                            self.apply(evidence).await;
                        }
                    }
                    None => {
                        debug!("Push event source closed");
                        push_open = false;
                    }
                },
                report = polls.recv(), if poll_open => match report {
                    Some(report) => {
                        for evidence in evidence_from_poll(report) {
                            self.apply(evidence).await;
                        }
                    }
                    None => {
                        debug!("Poll report source closed");
                        poll_open = false;
                    }
                },
            }
        }

        warn!("State reconciler inputs closed, stopping");
    }

    async fn apply(&mut self, evidence: Evidence) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }

        let was_empty = self.core.phase() == ReconcilerPhase::Empty;
        match self.core.apply(evidence) {
            Applied::StatusReplaced => {
                if let Some(status) = self.core.status() {
                    self.status_store.publish(status.clone());
                }
            }
            Applied::SystemReplaced => {
                if let Some(snapshot) = self.core.system() {
                    self.system_store.publish(snapshot.clone());
                }
            }
            Applied::Discarded | Applied::Noted => {}
        }

        if was_empty && self.core.phase() == ReconcilerPhase::Live {
            info!("State reconciler is live");
        }
        *self.stats.write().await = self.core.stats().clone();
    }
}
