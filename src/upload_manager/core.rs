use super::{
    batcher::{authorize_in_batches, AuthorizationOutcome},
    executor::UploadExecutor,
};
use crate::api::drive::{
    endpoints::{CompletionReporter, UploadAuthorizer, UploadTransport},
    models::{TaskResult, TransferProgress, UploadAuthorization, UploadTask},
};
use crate::error::{ConfigError, QueueError};
use crate::queue::{collect_results, ProgressReporter, QueueStatus, RunSummary, TaskLedger};
use crate::semaphore::Semaphore;
use crate::settings::QueueManagerConfig;
use futures::{channel::mpsc::UnboundedReceiver, stream::FuturesUnordered, StreamExt};
use log::{debug, error, info};
use std::sync::Arc;

/// 上传队列管理器：授权（按批） → 受并发上限约束的传输 → 汇总。
///
/// 同一时刻最多只有一个驱动任务在跑；运行期间追加的任务由同一个驱动接着处理。
/// `max_concurrent` 约束的是整个管理器实例的并发传输数，而不是每一批。
#[derive(Clone)]
pub struct UploadManager {
    config: QueueManagerConfig,
    ledger: Arc<TaskLedger<UploadTask>>,
    concurrency_guard: Arc<Semaphore>,
    authorizer: Arc<dyn UploadAuthorizer>,
    executor: UploadExecutor,
}

impl UploadManager {
    pub fn new(
        config: QueueManagerConfig,
        authorizer: Arc<dyn UploadAuthorizer>,
        transport: Arc<dyn UploadTransport>,
        reporter: Arc<dyn CompletionReporter>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            ledger: Arc::new(TaskLedger::new()),
            concurrency_guard: Arc::new(Semaphore::new(config.max_concurrent)),
            authorizer,
            executor: UploadExecutor::new(transport, reporter),
        })
    }

    pub fn config(&self) -> QueueManagerConfig {
        self.config
    }

    /// 提交一批任务，等这批里每个任务都有结果后返回（与输入顺序一致）。
    /// 单个任务失败写进结果，不会以 Err 返回；Err 只代表 id 非法或重复。
    pub async fn add_tasks(&self, tasks: Vec<UploadTask>) -> Result<Vec<TaskResult>, QueueError> {
        if tasks.is_empty() {
            return Ok(Vec::new());
        }
        let submission = self.ledger.submit(tasks)?;
        if submission.start_driver {
            tokio::spawn(self.clone().drive());
        }
        Ok(collect_results(submission.receivers).await)
    }

    /// 取消所有尚未开始传输的任务，它们以 "cancelled" 失败结束；正在传输的任务不会被打断。
    pub fn cancel_all(&self) -> usize {
        let cancelled = self.ledger.cancel_all();
        info!("[upload-queue] cancel requested, {cancelled} task(s) not yet started");
        cancelled
    }

    pub fn status(&self) -> QueueStatus {
        self.ledger.status()
    }

    pub fn subscribe_progress(&self) -> UnboundedReceiver<TransferProgress> {
        self.ledger.progress().subscribe()
    }

    async fn drive(self) {
        debug!("[upload-queue] run started");
        // 第一阶段直接在驱动任务上调用协作方；它们 panic 时由守卫让所有等待者拿到失败结果
        let guard = self.ledger.run_guard();
        let mut transfers = FuturesUnordered::new();
        loop {
            let (batch, generation) = self.ledger.take_pending();
            if !batch.is_empty() {
                let outcomes =
                    authorize_in_batches(batch, self.config.batch_size, self.authorizer.as_ref())
                        .await;
                let still_current = self.ledger.is_current(generation);
                for AuthorizationOutcome { task, result } in outcomes {
                    if !still_current {
                        self.ledger.settle(TaskResult::cancelled(task.task_id));
                        continue;
                    }
                    match result {
                        Err(error) => self.ledger.settle(TaskResult::failed(task.task_id, error)),
                        Ok(authorization) => {
                            let task_id = task.task_id.clone();
                            let handle =
                                tokio::spawn(self.clone().transfer(task, authorization, generation));
                            transfers.push(async move { (task_id, handle.await) });
                        }
                    }
                }
                continue;
            }

            if transfers.is_empty() {
                match self.ledger.finish_run() {
                    Some(summary) => {
                        guard.finish();
                        self.report_run(summary);
                        break;
                    }
                    None => continue,
                }
            }

            tokio::select! {
                Some((task_id, joined)) = transfers.next() => {
                    if let Err(err) = joined {
                        error!("[upload-queue] transfer for task {task_id} ended abnormally: {err}");
                        self.ledger.settle(TaskResult::failed(task_id, "transfer ended abnormally"));
                    }
                }
                _ = self.ledger.notified() => {}
            }
        }
    }

    async fn transfer(self, task: UploadTask, authorization: UploadAuthorization, generation: u64) {
        let permit = tokio::select! {
            permit = self.concurrency_guard.clone().acquire_owned() => permit,
            _ = self.ledger.cancelled(generation) => {
                self.ledger.settle(TaskResult::cancelled(task.task_id.clone()));
                return;
            }
        };
        let Some(active) = self.ledger.begin_transfer(&task.task_id, generation) else {
            drop(permit);
            self.ledger.settle(TaskResult::cancelled(task.task_id));
            return;
        };

        let progress = ProgressReporter::with_broadcaster(
            task.task_id.clone(),
            task.on_progress.clone(),
            Some(self.ledger.progress().clone()),
        );
        let result = self.executor.execute(&task, &authorization, &progress).await;
        active.settle(result);
        drop(permit);
    }

    /// 第三阶段：完成上报已经在传输阶段逐个完成，这里只做不阻塞的本轮汇总。
    fn report_run(&self, summary: RunSummary) {
        info!(
            "[upload-queue] run finished: {} succeeded, {} failed, {} total",
            summary.succeeded, summary.failed, summary.total
        );
    }
}
