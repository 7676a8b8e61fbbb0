use crate::api::drive::{
    endpoints::{CompletionReporter, UploadTransport},
    models::{TaskResult, UploadAuthorization, UploadTask},
};
use crate::queue::ProgressReporter;
use log::{debug, warn};
use std::sync::Arc;

/// 执行单个已授权任务：传输字节 → 上报完成。任一步失败都只影响本任务，不自动重试。
#[derive(Clone)]
pub struct UploadExecutor {
    transport: Arc<dyn UploadTransport>,
    reporter: Arc<dyn CompletionReporter>,
}

impl UploadExecutor {
    pub fn new(transport: Arc<dyn UploadTransport>, reporter: Arc<dyn CompletionReporter>) -> Self {
        Self {
            transport,
            reporter,
        }
    }

    pub async fn execute(
        &self,
        task: &UploadTask,
        authorization: &UploadAuthorization,
        progress: &ProgressReporter,
    ) -> TaskResult {
        debug!(
            "[upload-queue] transferring task {} ({}) as artifact {}",
            task.task_id, task.file_name, authorization.artifact_id
        );
        progress.report(0);
        if let Err(err) = self
            .transport
            .upload(
                &task.source,
                &authorization.upload_target,
                &task.content_type,
                progress,
            )
            .await
        {
            warn!(
                "[upload-queue] transfer failed for task {} ({}): {err}",
                task.task_id, task.file_name
            );
            return TaskResult::failed(task.task_id.clone(), err.to_string());
        }
        progress.report(100);

        if let Err(err) = self.reporter.report_complete(&authorization.artifact_id).await {
            warn!(
                "[upload-queue] completion report failed for artifact {}: {err}",
                authorization.artifact_id
            );
            return TaskResult::failed(task.task_id.clone(), err.to_string());
        }

        debug!(
            "[upload-queue] task {} finalized as artifact {}",
            task.task_id, authorization.artifact_id
        );
        TaskResult::uploaded(task.task_id.clone(), authorization.artifact_id.clone())
    }
}
