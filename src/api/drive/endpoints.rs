use super::models::{AuthorizationRequest, DownloadTarget, UploadAuthorization, UploadSource};
use crate::error::DriveError;
use crate::queue::ProgressReporter;
use async_trait::async_trait;
use std::path::Path;

/// 上传授权接口：为单个文件申请预签名上传地址。
#[async_trait]
pub trait UploadAuthorizer: Send + Sync {
    async fn authorize(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<UploadAuthorization, DriveError>;
}

/// 字节传输：把内容写到授权过的目标地址，可选地上报 0..=100 的进度。
#[async_trait]
pub trait UploadTransport: Send + Sync {
    async fn upload(
        &self,
        source: &UploadSource,
        target: &str,
        content_type: &str,
        progress: &ProgressReporter,
    ) -> Result<(), DriveError>;
}

/// 完成上报：通知服务端该 artifact 已经上传完毕。
#[async_trait]
pub trait CompletionReporter: Send + Sync {
    async fn report_complete(&self, artifact_id: &str) -> Result<(), DriveError>;
}

#[async_trait]
pub trait DownloadUrlResolver: Send + Sync {
    async fn resolve(&self, artifact_id: &str) -> Result<DownloadTarget, DriveError>;
}

/// 下载传输：把远端内容写入 `destination`，返回写入的字节数。
#[async_trait]
pub trait DownloadTransport: Send + Sync {
    async fn fetch(
        &self,
        url: &str,
        destination: &Path,
        progress: &ProgressReporter,
    ) -> Result<u64, DriveError>;
}
