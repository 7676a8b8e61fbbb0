use super::progress::ProgressBroadcaster;
use crate::api::drive::models::{DownloadTask, TaskResult, UploadTask};
use crate::error::QueueError;
use futures::{channel::oneshot, future::join_all};
use log::error;
use serde::Serialize;
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
};
use tokio::sync::{watch, Notify};

/// 队列里的任务都需要提供一个用来关联结果的 id。
pub(crate) trait QueuedTask: Send + 'static {
    fn task_id(&self) -> &str;
}

impl QueuedTask for UploadTask {
    fn task_id(&self) -> &str {
        &self.task_id
    }
}

impl QueuedTask for DownloadTask {
    fn task_id(&self) -> &str {
        &self.task_id
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum RunState {
    Idle,
    Processing,
}

/// 队列状态快照。计数覆盖当前这一轮运行，从 Idle 进入 Processing 时清零。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub state: RunState,
    pub queued: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub total: usize,
}

pub(crate) struct Submission {
    pub receivers: Vec<(String, oneshot::Receiver<TaskResult>)>,
    pub start_driver: bool,
}

/// 两个队列管理器共用的账本：待处理列表、每个任务的完成信号、运行状态和计数。
///
/// 所有字段都在同一把锁内修改，锁不会跨越任何 await。
pub(crate) struct TaskLedger<T> {
    state: Mutex<LedgerState<T>>,
    wakeup: Notify,
    generation: watch::Sender<u64>,
    progress: Arc<ProgressBroadcaster>,
}

struct LedgerState<T> {
    run_state: RunState,
    pending: Vec<T>,
    waiters: HashMap<String, oneshot::Sender<TaskResult>>,
    generation: u64,
    active_ids: HashSet<String>,
    completed: usize,
    failed: usize,
    total: usize,
}

impl<T: QueuedTask> TaskLedger<T> {
    pub(crate) fn new() -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            state: Mutex::new(LedgerState {
                run_state: RunState::Idle,
                pending: Vec::new(),
                waiters: HashMap::new(),
                generation: 0,
                active_ids: HashSet::new(),
                completed: 0,
                failed: 0,
                total: 0,
            }),
            wakeup: Notify::new(),
            generation,
            progress: Arc::new(ProgressBroadcaster::default()),
        }
    }

    pub(crate) fn progress(&self) -> &Arc<ProgressBroadcaster> {
        &self.progress
    }

    /// 登记一批任务。先整体校验 id，校验失败时不会有任何任务入队。
    pub(crate) fn submit(&self, tasks: Vec<T>) -> Result<Submission, QueueError> {
        let mut state = self.lock_state();
        let mut seen = HashSet::with_capacity(tasks.len());
        for task in &tasks {
            let id = task.task_id();
            if id.trim().is_empty() {
                return Err(QueueError::EmptyTaskId);
            }
            if !seen.insert(id) || state.waiters.contains_key(id) {
                return Err(QueueError::DuplicateTask(id.to_string()));
            }
        }

        let start_driver = state.run_state == RunState::Idle;
        if start_driver {
            state.run_state = RunState::Processing;
            state.completed = 0;
            state.failed = 0;
            state.total = 0;
        }

        let mut receivers = Vec::with_capacity(tasks.len());
        for task in tasks {
            let (sender, receiver) = oneshot::channel();
            let id = task.task_id().to_string();
            state.waiters.insert(id.clone(), sender);
            receivers.push((id, receiver));
            state.pending.push(task);
            state.total += 1;
        }
        drop(state);

        if !start_driver {
            self.wakeup.notify_one();
        }
        Ok(Submission {
            receivers,
            start_driver,
        })
    }

    /// 取走当前全部待处理任务，并返回取走时的代数，用来识别之后发生的 cancel_all。
    pub(crate) fn take_pending(&self) -> (Vec<T>, u64) {
        let mut state = self.lock_state();
        (std::mem::take(&mut state.pending), state.generation)
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.lock_state().generation == generation
    }

    /// 在 `generation` 之后发生 cancel_all 时完成。
    pub(crate) async fn cancelled(&self, generation: u64) {
        let mut receiver = self.generation.subscribe();
        let _ = receiver.wait_for(|current| *current != generation).await;
    }

    /// 拿到许可后登记为进行中；期间发生过取消则返回 None，任务不再开始。
    pub(crate) fn begin_transfer(
        self: &Arc<Self>,
        task_id: &str,
        generation: u64,
    ) -> Option<ActiveTransfer<T>> {
        let mut state = self.lock_state();
        if state.generation != generation {
            return None;
        }
        state.active_ids.insert(task_id.to_string());
        Some(ActiveTransfer {
            ledger: self.clone(),
            task_id: task_id.to_string(),
            settled: false,
        })
    }

    /// 记录一个未进入传输阶段的任务结果（授权失败、取消、已存在的下载等）。
    pub(crate) fn settle(&self, result: TaskResult) {
        let mut state = self.lock_state();
        let delivery = record(&mut state, result);
        drop(state);
        deliver(delivery);
    }

    fn settle_active(&self, result: TaskResult) {
        let mut state = self.lock_state();
        state.active_ids.remove(&result.task_id);
        let delivery = record(&mut state, result);
        drop(state);
        deliver(delivery);
    }

    /// 清空待处理列表并推进代数；返回尚未开始传输的任务数。
    /// 已在传输中的任务不受影响。
    pub(crate) fn cancel_all(&self) -> usize {
        let mut state = self.lock_state();
        let not_started = state
            .total
            .saturating_sub(state.completed)
            .saturating_sub(state.active_ids.len());
        state.generation += 1;
        let generation = state.generation;
        let pending = std::mem::take(&mut state.pending);
        let deliveries: Vec<_> = pending
            .iter()
            .map(|task| record(&mut state, TaskResult::cancelled(task.task_id())))
            .collect();
        drop(state);

        self.generation.send_replace(generation);
        self.wakeup.notify_one();
        for delivery in deliveries {
            deliver(delivery);
        }
        not_started
    }

    /// 驱动任务异常退出时收尾：除已在传输中的任务外，所有还在等结果的任务以失败结束；
    /// 推进代数让还没拿到许可的传输放弃，并切回 Idle，之后的提交会重新启动驱动。
    pub(crate) fn abort_run(&self, reason: &str) -> usize {
        let mut guard = self.lock_state();
        let state = &mut *guard;
        state.generation += 1;
        let generation = state.generation;
        state.pending.clear();
        let stranded: Vec<String> = state
            .waiters
            .keys()
            .filter(|id| !state.active_ids.contains(*id))
            .cloned()
            .collect();
        let deliveries: Vec<_> = stranded
            .into_iter()
            .map(|id| record(state, TaskResult::failed(id, reason)))
            .collect();
        state.run_state = RunState::Idle;
        drop(guard);

        self.generation.send_replace(generation);
        let settled = deliveries.len();
        for delivery in deliveries {
            deliver(delivery);
        }
        settled
    }

    /// 驱动任务开始时领取；正常结束调用 `finish`，否则 drop 时走 `abort_run`。
    pub(crate) fn run_guard(self: &Arc<Self>) -> RunGuard<T> {
        RunGuard {
            ledger: self.clone(),
            finished: false,
        }
    }

    /// 没有新的待处理任务时切回 Idle，并返回本轮汇总。
    pub(crate) fn finish_run(&self) -> Option<RunSummary> {
        let mut state = self.lock_state();
        if !state.pending.is_empty() {
            return None;
        }
        state.run_state = RunState::Idle;
        Some(RunSummary {
            succeeded: state.completed.saturating_sub(state.failed),
            failed: state.failed,
            total: state.total,
        })
    }

    pub(crate) fn status(&self) -> QueueStatus {
        let state = self.lock_state();
        QueueStatus {
            state: state.run_state,
            queued: state
                .total
                .saturating_sub(state.completed)
                .saturating_sub(state.active_ids.len()),
            active: state.active_ids.len(),
            completed: state.completed,
            failed: state.failed,
            total: state.total,
        }
    }

    pub(crate) async fn notified(&self) {
        self.wakeup.notified().await;
    }

    fn lock_state(&self) -> MutexGuard<'_, LedgerState<T>> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        }
    }
}

type Delivery = Option<(oneshot::Sender<TaskResult>, TaskResult)>;

fn record<T>(state: &mut LedgerState<T>, result: TaskResult) -> Delivery {
    let sender = state.waiters.remove(&result.task_id)?;
    state.completed += 1;
    if !result.is_success() {
        state.failed += 1;
    }
    Some((sender, result))
}

fn deliver(delivery: Delivery) {
    if let Some((sender, result)) = delivery {
        // 调用方已经不再等待时丢弃结果即可
        let _ = sender.send(result);
    }
}

/// 持有一个"传输中"名额。正常路径通过 `settle` 交付结果；
/// 如果传输 future 在交付前被丢弃（panic、abort），drop 时补一个失败结果。
pub(crate) struct ActiveTransfer<T: QueuedTask> {
    ledger: Arc<TaskLedger<T>>,
    task_id: String,
    settled: bool,
}

impl<T: QueuedTask> ActiveTransfer<T> {
    pub(crate) fn settle(mut self, result: TaskResult) {
        self.settled = true;
        self.ledger.settle_active(result);
    }
}

impl<T: QueuedTask> Drop for ActiveTransfer<T> {
    fn drop(&mut self) {
        if !self.settled {
            self.ledger.settle_active(TaskResult::failed(
                self.task_id.clone(),
                "transfer aborted before it settled",
            ));
        }
    }
}

/// 驱动任务的存活守卫。驱动 panic 时 future 被销毁，守卫负责让等待者拿到结果并复位状态。
pub(crate) struct RunGuard<T: QueuedTask> {
    ledger: Arc<TaskLedger<T>>,
    finished: bool,
}

impl<T: QueuedTask> RunGuard<T> {
    pub(crate) fn finish(mut self) {
        self.finished = true;
    }
}

impl<T: QueuedTask> Drop for RunGuard<T> {
    fn drop(&mut self) {
        if !self.finished {
            let settled = self.ledger.abort_run(DRIVER_STOPPED_MESSAGE);
            error!("[queue] driver stopped unexpectedly, {settled} waiting task(s) failed");
        }
    }
}

pub(crate) const DRIVER_STOPPED_MESSAGE: &str = "queue stopped unexpectedly";

/// 等待本次提交的所有任务结果，按提交顺序返回。
pub(crate) async fn collect_results(
    receivers: Vec<(String, oneshot::Receiver<TaskResult>)>,
) -> Vec<TaskResult> {
    join_all(receivers.into_iter().map(|(task_id, receiver)| async move {
        receiver
            .await
            .unwrap_or_else(|_| TaskResult::failed(task_id, "queue shut down before the task settled"))
    }))
    .await
}
