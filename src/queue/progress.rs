use crate::api::drive::models::{ProgressCallback, TransferProgress};
use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use std::sync::{Arc, Mutex, MutexGuard};

/// 进度广播：把每个任务的进度事件推给所有订阅者，断开的订阅者在下一次广播时清理。
#[derive(Default)]
pub(crate) struct ProgressBroadcaster {
    subscribers: Mutex<Vec<UnboundedSender<TransferProgress>>>,
}

impl ProgressBroadcaster {
    pub(crate) fn subscribe(&self) -> UnboundedReceiver<TransferProgress> {
        let (tx, rx) = mpsc::unbounded();
        let mut subs = match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        };
        subs.push(tx);
        rx
    }

    fn broadcast(&self, update: &TransferProgress) {
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.retain(|sender| sender.unbounded_send(update.clone()).is_ok());
        }
    }
}

/// 单个任务的进度上报器，交给传输层使用。
///
/// 上报值会被截断到 0..=100，并且只有严格大于上一次的值才会真正发出。
/// 比较和发出在同一把锁内完成，多个线程同时上报时回调看到的序列仍然递增。
/// 克隆后共享同一个进度状态；回调里不能再对同一个任务上报。
#[derive(Clone)]
pub struct ProgressReporter {
    inner: Arc<ReporterInner>,
}

struct ReporterInner {
    task_id: String,
    callback: Option<ProgressCallback>,
    broadcaster: Option<Arc<ProgressBroadcaster>>,
    last: Mutex<Option<u8>>,
}

impl ProgressReporter {
    pub fn new(task_id: impl Into<String>, callback: Option<ProgressCallback>) -> Self {
        Self::with_broadcaster(task_id, callback, None)
    }

    pub(crate) fn with_broadcaster(
        task_id: impl Into<String>,
        callback: Option<ProgressCallback>,
        broadcaster: Option<Arc<ProgressBroadcaster>>,
    ) -> Self {
        Self {
            inner: Arc::new(ReporterInner {
                task_id: task_id.into(),
                callback,
                broadcaster,
                last: Mutex::new(None),
            }),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.inner.task_id
    }

    pub fn report(&self, percent: u8) {
        let percent = percent.min(100);
        let mut last = self.inner.lock_last();
        if last.is_some_and(|previous| percent <= previous) {
            return;
        }
        *last = Some(percent);
        let update = TransferProgress {
            task_id: self.inner.task_id.clone(),
            percent,
        };
        if let Some(broadcaster) = self.inner.broadcaster.as_ref() {
            broadcaster.broadcast(&update);
        }
        if let Some(callback) = self.inner.callback.as_ref() {
            callback(update);
        }
    }

    /// 按字节数换算百分比；总量未知（0）时不上报。
    pub fn report_bytes(&self, transferred: u64, total: u64) {
        if total == 0 {
            return;
        }
        let percent = (transferred.min(total) * 100 / total) as u8;
        self.report(percent);
    }

    pub fn last_reported(&self) -> Option<u8> {
        *self.inner.lock_last()
    }
}

impl ReporterInner {
    fn lock_last(&self) -> MutexGuard<'_, Option<u8>> {
        match self.last.lock() {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        }
    }
}
