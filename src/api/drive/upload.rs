use super::client::build_client;
use super::endpoints::UploadTransport;
use super::models::UploadSource;
use crate::error::DriveError;
use crate::queue::ProgressReporter;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use log::debug;
use reqwest::{header, Body, Client};
use std::convert::Infallible;
use std::time::Duration;

/// 每次往请求体里推送的块大小，也决定了进度回调的粒度。
const UPLOAD_CHUNK_BYTES: usize = 64 * 1024;

/// 单请求上传的上限，超出需要服务端支持分片。
const SINGLE_PUT_MAX_BYTES: usize = 250 * 1024 * 1024;

/// 把内容 PUT 到预签名地址。预签名 URL 自带授权，不注入 bearer token。
pub struct HttpUploadTransport {
    client: Client,
}

impl HttpUploadTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, DriveError> {
        Ok(Self::new(build_client(timeout)?))
    }
}

async fn load_source(source: &UploadSource) -> Result<Bytes, DriveError> {
    match source {
        UploadSource::Bytes(content) => Ok(content.clone()),
        UploadSource::File(path) => Ok(Bytes::from(tokio::fs::read(path).await?)),
    }
}

/// 按块切分并在每块被 hyper 取走时上报进度。
fn progress_body(content: Bytes, progress: ProgressReporter) -> Body {
    let total = content.len() as u64;
    let chunks = stream::unfold(0usize, move |offset| {
        let content = content.clone();
        let progress = progress.clone();
        async move {
            if offset >= content.len() {
                return None;
            }
            let end = (offset + UPLOAD_CHUNK_BYTES).min(content.len());
            let chunk = content.slice(offset..end);
            progress.report_bytes(end as u64, total);
            Some((Ok::<Bytes, Infallible>(chunk), end))
        }
    });
    Body::wrap_stream(chunks)
}

#[async_trait]
impl UploadTransport for HttpUploadTransport {
    async fn upload(
        &self,
        source: &UploadSource,
        target: &str,
        content_type: &str,
        progress: &ProgressReporter,
    ) -> Result<(), DriveError> {
        let content = load_source(source).await?;
        if content.len() > SINGLE_PUT_MAX_BYTES {
            return Err(DriveError::Other(
                "file too large for a single upload request".to_string(),
            ));
        }
        let content_length = content.len();
        debug!(
            "[upload-transport] uploading {} bytes for task {}",
            content_length,
            progress.task_id()
        );

        let response = self
            .client
            .put(target)
            .header(header::CONTENT_TYPE, content_type)
            .header(header::CONTENT_LENGTH, content_length)
            .body(progress_body(content, progress.clone()))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(DriveError::Status {
                context: "upload target",
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }
}
