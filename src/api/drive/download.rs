use super::client::build_client;
use super::endpoints::DownloadTransport;
use crate::error::DriveError;
use crate::queue::ProgressReporter;
use async_trait::async_trait;
use futures::StreamExt;
use log::debug;
use reqwest::Client;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// 从预签名地址流式下载到本地文件。
pub struct HttpDownloadTransport {
    client: Client,
}

impl HttpDownloadTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, DriveError> {
        Ok(Self::new(build_client(timeout)?))
    }
}

#[async_trait]
impl DownloadTransport for HttpDownloadTransport {
    async fn fetch(
        &self,
        url: &str,
        destination: &Path,
        progress: &ProgressReporter,
    ) -> Result<u64, DriveError> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(DriveError::Status {
                context: "download endpoint",
                status: response.status().as_u16(),
            });
        }

        let total = response.content_length().unwrap_or(0);
        let mut file = tokio::fs::File::create(destination).await?;
        let mut written: u64 = 0;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            progress.report_bytes(written, total);
        }
        file.flush().await?;

        debug!(
            "[download-transport] saved {} bytes to {}",
            written,
            destination.to_string_lossy()
        );
        Ok(written)
    }
}

const FALLBACK_FILE_NAME: &str = "download.bin";

fn is_unsafe_in_file_name(c: char) -> bool {
    matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|') || c.is_control()
}

/// 服务端文件名转本地文件名：分隔符、Windows 保留字符、控制字符都换成 `_`。
/// 清洗后为空或只剩 `.`/`..` 时退回 `download.bin`。
pub fn sanitize_file_name(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| if is_unsafe_in_file_name(c) { '_' } else { c })
        .collect();
    match cleaned.trim() {
        "" | "." | ".." => FALLBACK_FILE_NAME.to_string(),
        name => name.to_string(),
    }
}
