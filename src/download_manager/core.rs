use super::claims::{DestinationClaim, DestinationClaims};
use super::storage::LocalStorage;
use crate::api::drive::{
    endpoints::{DownloadTransport, DownloadUrlResolver},
    models::{DownloadTarget, DownloadTask, TaskResult, TransferProgress},
};
use crate::error::{ConfigError, QueueError};
use crate::queue::{collect_results, ProgressReporter, QueueStatus, RunSummary, TaskLedger};
use crate::semaphore::Semaphore;
use crate::settings::QueueManagerConfig;
use crate::upload_manager::run_in_batches;
use futures::{channel::mpsc::UnboundedReceiver, stream::FuturesUnordered, StreamExt};
use log::{debug, error, info, warn};
use std::sync::Arc;

/// 下载队列管理器：与上传管理器同一套调度，只有两个阶段（解析下载地址 → 受限并发写入本地）。
/// 本地已存在目标文件时直接返回成功，不发起任何网络请求。
/// 数据先写入 `<文件名>.part`，完整收到后才改名为目标文件。
#[derive(Clone)]
pub struct DownloadManager {
    config: QueueManagerConfig,
    ledger: Arc<TaskLedger<DownloadTask>>,
    concurrency_guard: Arc<Semaphore>,
    resolver: Arc<dyn DownloadUrlResolver>,
    transport: Arc<dyn DownloadTransport>,
    storage: Arc<dyn LocalStorage>,
    destinations: DestinationClaims,
}

impl DownloadManager {
    pub fn new(
        config: QueueManagerConfig,
        resolver: Arc<dyn DownloadUrlResolver>,
        transport: Arc<dyn DownloadTransport>,
        storage: Arc<dyn LocalStorage>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            ledger: Arc::new(TaskLedger::new()),
            concurrency_guard: Arc::new(Semaphore::new(config.max_concurrent)),
            resolver,
            transport,
            storage,
            destinations: DestinationClaims::default(),
        })
    }

    pub fn config(&self) -> QueueManagerConfig {
        self.config
    }

    pub async fn add_tasks(
        &self,
        tasks: Vec<DownloadTask>,
    ) -> Result<Vec<TaskResult>, QueueError> {
        if tasks.is_empty() {
            return Ok(Vec::new());
        }
        let submission = self.ledger.submit(tasks)?;
        if submission.start_driver {
            tokio::spawn(self.clone().drive());
        }
        Ok(collect_results(submission.receivers).await)
    }

    pub fn cancel_all(&self) -> usize {
        let cancelled = self.ledger.cancel_all();
        info!("[download-queue] cancel requested, {cancelled} task(s) not yet started");
        cancelled
    }

    pub fn status(&self) -> QueueStatus {
        self.ledger.status()
    }

    pub fn subscribe_progress(&self) -> UnboundedReceiver<TransferProgress> {
        self.ledger.progress().subscribe()
    }

    async fn drive(self) {
        debug!("[download-queue] run started");
        // 第一阶段直接在驱动任务上调用协作方；它们 panic 时由守卫让所有等待者拿到失败结果
        let guard = self.ledger.run_guard();
        let mut transfers = FuturesUnordered::new();
        loop {
            let (batch, generation) = self.ledger.take_pending();
            if !batch.is_empty() {
                let mut to_fetch = Vec::with_capacity(batch.len());
                for task in batch {
                    let local_path = task.local_path();
                    let Some(claim) = self.destinations.claim(&local_path) else {
                        warn!(
                            "[download-queue] {} targets {}, which another download is writing",
                            task.artifact_id,
                            local_path.to_string_lossy()
                        );
                        self.ledger.settle(TaskResult::failed(
                            task.task_id,
                            format!(
                                "another download is already writing to {}",
                                local_path.to_string_lossy()
                            ),
                        ));
                        continue;
                    };
                    if self.storage.exists(&local_path).await {
                        debug!(
                            "[download-queue] {} already present at {}, skipping transfer",
                            task.artifact_id,
                            local_path.to_string_lossy()
                        );
                        self.ledger
                            .settle(TaskResult::downloaded(task.task_id, local_path, 0, true));
                    } else {
                        to_fetch.push((task, claim));
                    }
                }

                let resolver = self.resolver.as_ref();
                let resolved = run_in_batches(
                    to_fetch,
                    self.config.batch_size,
                    move |(task, claim)| async move {
                        let target = resolver.resolve(&task.artifact_id).await;
                        (task, claim, target)
                    },
                )
                .await;

                let still_current = self.ledger.is_current(generation);
                for (task, claim, target) in resolved {
                    if !still_current {
                        self.ledger.settle(TaskResult::cancelled(task.task_id));
                        continue;
                    }
                    match target {
                        Err(err) => {
                            warn!(
                                "[download-queue] failed to resolve download url for {}: {err}",
                                task.artifact_id
                            );
                            self.ledger
                                .settle(TaskResult::failed(task.task_id, err.to_string()));
                        }
                        Ok(target) => {
                            let task_id = task.task_id.clone();
                            let handle = tokio::spawn(
                                self.clone().transfer(task, target, claim, generation),
                            );
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
                        error!("[download-queue] transfer for task {task_id} ended abnormally: {err}");
                        self.ledger.settle(TaskResult::failed(task_id, "transfer ended abnormally"));
                    }
                }
                _ = self.ledger.notified() => {}
            }
        }
    }

    /// 目标路径在传输期间一直被占用，交出结果前释放。
    async fn transfer(
        self,
        task: DownloadTask,
        target: DownloadTarget,
        claim: DestinationClaim,
        generation: u64,
    ) {
        let permit = tokio::select! {
            permit = self.concurrency_guard.clone().acquire_owned() => permit,
            _ = self.ledger.cancelled(generation) => {
                drop(claim);
                self.ledger.settle(TaskResult::cancelled(task.task_id.clone()));
                return;
            }
        };
        let Some(active) = self.ledger.begin_transfer(&task.task_id, generation) else {
            drop(permit);
            drop(claim);
            self.ledger.settle(TaskResult::cancelled(task.task_id));
            return;
        };

        let result = self.fetch_one(&task, &target).await;
        drop(claim);
        active.settle(result);
        drop(permit);
    }

    async fn fetch_one(&self, task: &DownloadTask, target: &DownloadTarget) -> TaskResult {
        if let Err(err) = self.storage.create_dir_all(&task.target_dir).await {
            warn!(
                "[download-queue] cannot create download directory {}: {err}",
                task.target_dir.to_string_lossy()
            );
            return TaskResult::failed(
                task.task_id.clone(),
                format!(
                    "failed to create download directory {}: {err}",
                    task.target_dir.to_string_lossy()
                ),
            );
        }

        let local_path = task.local_path();
        let partial_path = task.partial_path();
        let progress = ProgressReporter::with_broadcaster(
            task.task_id.clone(),
            task.on_progress.clone(),
            Some(self.ledger.progress().clone()),
        );
        progress.report(0);
        let fetched = self
            .transport
            .fetch(&target.download_url, &partial_path, &progress)
            .await;
        let outcome = match fetched {
            Ok(bytes) => self
                .storage
                .rename(&partial_path, &local_path)
                .await
                .map(|()| bytes)
                .map_err(|err| {
                    format!(
                        "failed to move download into place at {}: {err}",
                        local_path.to_string_lossy()
                    )
                }),
            Err(err) => Err(err.to_string()),
        };

        match outcome {
            Ok(bytes) => {
                progress.report(100);
                debug!(
                    "[download-queue] saved {} bytes to {}",
                    bytes,
                    local_path.to_string_lossy()
                );
                TaskResult::downloaded(task.task_id.clone(), local_path, bytes, false)
            }
            Err(message) => {
                warn!(
                    "[download-queue] download failed for {}: {message}",
                    task.artifact_id
                );
                // 只清理自己的临时文件；清理失败只记录日志
                if let Err(cleanup) = self.storage.remove_file(&partial_path).await {
                    warn!(
                        "[download-queue] failed to remove partial file {}: {cleanup}",
                        partial_path.to_string_lossy()
                    );
                }
                TaskResult::failed(task.task_id.clone(), message)
            }
        }
    }

    fn report_run(&self, summary: RunSummary) {
        info!(
            "[download-queue] run finished: {} succeeded, {} failed, {} total",
            summary.succeeded, summary.failed, summary.total
        );
    }
}
