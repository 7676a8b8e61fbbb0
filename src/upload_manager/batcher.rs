use crate::api::drive::{
    endpoints::UploadAuthorizer,
    models::{AuthorizationRequest, UploadAuthorization, UploadTask},
};
use futures::future::join_all;
use log::{debug, warn};
use std::future::Future;

/// 单个任务的授权结果；失败的任务不会进入传输阶段。
#[derive(Debug)]
pub struct AuthorizationOutcome {
    pub task: UploadTask,
    pub result: Result<UploadAuthorization, String>,
}

impl AuthorizationOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// 按 `batch_size` 切成连续的块：块内并发执行，整块结束后才开始下一块。
/// 返回值与输入顺序一致。
pub async fn run_in_batches<T, R, F, Fut>(items: Vec<T>, batch_size: usize, mut operation: F) -> Vec<R>
where
    F: FnMut(T) -> Fut,
    Fut: Future<Output = R>,
{
    let batch_size = batch_size.max(1);
    let mut results = Vec::with_capacity(items.len());
    let mut remaining = items.into_iter().peekable();
    while remaining.peek().is_some() {
        let chunk: Vec<Fut> = remaining.by_ref().take(batch_size).map(&mut operation).collect();
        results.extend(join_all(chunk).await);
    }
    results
}

/// 预签名地址批量申请：每个任务一个授权请求，单个失败不影响同批其他任务。
pub async fn authorize_in_batches(
    tasks: Vec<UploadTask>,
    batch_size: usize,
    authorizer: &dyn UploadAuthorizer,
) -> Vec<AuthorizationOutcome> {
    debug!(
        "[upload-queue] requesting upload authorization for {} task(s), batch size {}",
        tasks.len(),
        batch_size
    );
    run_in_batches(tasks, batch_size, move |task| async move {
        let request = AuthorizationRequest::for_task(&task);
        let result = match authorizer.authorize(&request).await {
            Ok(authorization) => Ok(authorization),
            Err(err) => {
                warn!(
                    "[upload-queue] authorization failed for task {} ({}): {err}",
                    task.task_id, task.file_name
                );
                Err(err.to_string())
            }
        };
        AuthorizationOutcome { task, result }
    })
    .await
}
