//! 单写者值存储与状态对账
//!
//! 每个共享值（连接状态、挖矿状态、系统快照、资源包络、已接受配置）
//! 只有一个写入组件；其余组件只拿到只读的 [`StoreReader`]。
//! 写入接口为 `pub(crate)`，由模块边界保证单写者。

pub mod reconciler;

use crate::mining::MiningStatus;
use crate::monitoring::SystemSnapshot;
use chrono::{DateTime, Utc};
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::watch;

pub use reconciler::{Applied, Evidence, Origin, Reconciler, ReconcilerPhase, ReconcilerStats, StateReconciler};

/// 可按对账键排序的值
pub trait Sequenced {
    type Key: Ord + Copy + Debug;

    fn ordering_key(&self) -> Self::Key;
}

impl Sequenced for MiningStatus {
    type Key = u64;

    fn ordering_key(&self) -> u64 {
        self.sequence
    }
}

impl Sequenced for SystemSnapshot {
    type Key = DateTime<Utc>;

    fn ordering_key(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// 值存储的写端
pub struct ValueStore<T> {
    sender: watch::Sender<Option<Arc<T>>>,
}

impl<T> ValueStore<T> {
    pub(crate) fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self { sender }
    }

    /// 整体替换当前值
    pub(crate) fn publish(&self, value: T) {
        self.sender.send_replace(Some(Arc::new(value)));
    }

    pub fn reader(&self) -> StoreReader<T> {
        StoreReader {
            receiver: self.sender.subscribe(),
        }
    }
}

/// 值存储的只读端
pub struct StoreReader<T> {
    receiver: watch::Receiver<Option<Arc<T>>>,
}

impl<T> Clone for StoreReader<T> {
    fn clone(&self) -> Self {
        Self {
            receiver: self.receiver.clone(),
        }
    }
}

impl<T> StoreReader<T> {
    /// 最新值（尚无值时为 `None`）
    pub fn latest(&self) -> Option<Arc<T>> {
        self.receiver.borrow().clone()
    }

    /// 等待下一次替换；写端被释放后返回 `None`
    pub async fn changed(&mut self) -> Option<Arc<T>> {
        self.receiver.changed().await.ok()?;
        self.receiver.borrow_and_update().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_reader_sees_replacements() {
        let store = ValueStore::new();
        let mut reader = store.reader();
        assert!(reader.latest().is_none());

        store.publish(7u32);
        assert_eq!(reader.changed().await.as_deref(), Some(&7));
        assert_eq!(reader.latest().as_deref(), Some(&7));

        drop(store);
        assert!(reader.changed().await.is_none());
        assert_eq!(reader.latest().as_deref(), Some(&7));
    }

    #[test]
    fn test_changed_waits_for_publish() {
        let store = ValueStore::new();
        let mut reader = store.reader();
        let mut waiting = tokio_test::task::spawn(reader.changed());

        tokio_test::assert_pending!(waiting.poll());
        store.publish("live");
        assert!(waiting.is_woken());
        let value = tokio_test::assert_ready!(waiting.poll());
        assert_eq!(value.as_deref(), Some(&"live"));
    }
}
