// tests/common/mod.rs
//
// 队列与令牌刷新集成测试共用的桩协作方。

#![allow(dead_code)]

use async_trait::async_trait;
use rust_lib_photobackup::api::auth::{RefreshEndpoint, TokenGrant};
use rust_lib_photobackup::api::drive::{
    AuthorizationRequest, CompletionReporter, DownloadTarget, DownloadTransport,
    DownloadUrlResolver, UploadAuthorization, UploadAuthorizer, UploadSource, UploadTransport,
};
use rust_lib_photobackup::{AuthError, DriveError, ProgressReporter};
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 记录同时进行中的操作数和出现过的峰值。
#[derive(Default)]
pub struct ConcurrencyGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyGauge {
    pub fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    pub fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }
}

/// 上传授权桩：返回 `artifact-<文件名>`，指定文件名失败，`panics_on` 中的文件名直接 panic。
/// 每次调用记录开始时已经完成了多少次调用。
pub struct StubAuthorizer {
    pub failing: HashSet<String>,
    pub delay: Duration,
    pub started: Mutex<Vec<(String, usize)>>,
    pub finished: AtomicUsize,
    pub gauge: ConcurrencyGauge,
    pub panics_on: HashSet<String>,
}

impl StubAuthorizer {
    pub fn new() -> Self {
        Self::failing(&[])
    }

    pub fn failing(names: &[&str]) -> Self {
        Self {
            failing: names.iter().map(|n| n.to_string()).collect(),
            delay: Duration::from_millis(5),
            started: Mutex::new(Vec::new()),
            finished: AtomicUsize::new(0),
            gauge: ConcurrencyGauge::default(),
            panics_on: HashSet::new(),
        }
    }

    pub fn panicking_on(names: &[&str]) -> Self {
        Self {
            panics_on: names.iter().map(|n| n.to_string()).collect(),
            ..Self::new()
        }
    }

    pub fn calls(&self) -> usize {
        self.started.lock().unwrap().len()
    }
}

#[async_trait]
impl UploadAuthorizer for StubAuthorizer {
    async fn authorize(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<UploadAuthorization, DriveError> {
        if self.panics_on.contains(&request.file_name) {
            panic!("authorizer blew up on {}", request.file_name);
        }
        let finished_before = self.finished.load(Ordering::SeqCst);
        self.started
            .lock()
            .unwrap()
            .push((request.file_name.clone(), finished_before));
        self.gauge.enter();
        tokio::time::sleep(self.delay).await;
        self.gauge.exit();
        self.finished.fetch_add(1, Ordering::SeqCst);

        if self.failing.contains(&request.file_name) {
            return Err(DriveError::Other("authorization denied".to_string()));
        }
        Ok(UploadAuthorization {
            artifact_id: format!("artifact-{}", request.file_name),
            upload_target: format!("https://upload.test/{}", request.file_name),
            expires_at: None,
        })
    }
}

/// 上传传输桩：每次传输睡眠 `delay`，指定目标以 "network error" 失败。
pub struct StubUploadTransport {
    pub failing_targets: HashSet<String>,
    pub delay: Duration,
    pub uploaded: Mutex<Vec<String>>,
    pub gauge: ConcurrencyGauge,
}

impl StubUploadTransport {
    pub fn new(delay: Duration) -> Self {
        Self::failing(delay, &[])
    }

    pub fn failing(delay: Duration, file_names: &[&str]) -> Self {
        Self {
            failing_targets: file_names
                .iter()
                .map(|n| format!("https://upload.test/{n}"))
                .collect(),
            delay,
            uploaded: Mutex::new(Vec::new()),
            gauge: ConcurrencyGauge::default(),
        }
    }

    pub fn uploaded(&self) -> Vec<String> {
        self.uploaded.lock().unwrap().clone()
    }
}

#[async_trait]
impl UploadTransport for StubUploadTransport {
    async fn upload(
        &self,
        _source: &UploadSource,
        target: &str,
        _content_type: &str,
        progress: &ProgressReporter,
    ) -> Result<(), DriveError> {
        self.gauge.enter();
        progress.report(50);
        tokio::time::sleep(self.delay).await;
        self.gauge.exit();
        if self.failing_targets.contains(target) {
            return Err(DriveError::Other("network error".to_string()));
        }
        self.uploaded.lock().unwrap().push(target.to_string());
        Ok(())
    }
}

/// 完成上报桩：记录上报过的 artifact，指定的返回 500。
#[derive(Default)]
pub struct RecordingReporter {
    pub failing: HashSet<String>,
    pub reported: Mutex<Vec<String>>,
}

impl RecordingReporter {
    pub fn failing(artifacts: &[&str]) -> Self {
        Self {
            failing: artifacts.iter().map(|a| a.to_string()).collect(),
            reported: Mutex::new(Vec::new()),
        }
    }

    pub fn reported(&self) -> Vec<String> {
        self.reported.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionReporter for RecordingReporter {
    async fn report_complete(&self, artifact_id: &str) -> Result<(), DriveError> {
        self.reported.lock().unwrap().push(artifact_id.to_string());
        if self.failing.contains(artifact_id) {
            return Err(DriveError::Status {
                context: "upload completion",
                status: 500,
            });
        }
        Ok(())
    }
}

/// 下载地址解析桩：返回 `https://cdn.test/<artifact>`，指定 artifact 失败，`panics_on` 中的直接 panic。
#[derive(Default)]
pub struct StubResolver {
    pub failing: HashSet<String>,
    pub panics_on: HashSet<String>,
    pub calls: AtomicUsize,
}

impl StubResolver {
    pub fn failing(artifacts: &[&str]) -> Self {
        Self {
            failing: artifacts.iter().map(|a| a.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn panicking_on(artifacts: &[&str]) -> Self {
        Self {
            panics_on: artifacts.iter().map(|a| a.to_string()).collect(),
            ..Self::default()
        }
    }
}

#[async_trait]
impl DownloadUrlResolver for StubResolver {
    async fn resolve(&self, artifact_id: &str) -> Result<DownloadTarget, DriveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.panics_on.contains(artifact_id) {
            panic!("resolver blew up on {artifact_id}");
        }
        if self.failing.contains(artifact_id) {
            return Err(DriveError::Other(format!("photo {artifact_id} not found")));
        }
        Ok(DownloadTarget {
            download_url: format!("https://cdn.test/{artifact_id}"),
            size: None,
        })
    }
}

/// 下载传输桩：把固定内容写到目标路径。`failing` 中的地址只写一半就报错，留下半成品文件。
pub struct StubDownloadTransport {
    pub payload: Vec<u8>,
    pub failing: HashSet<String>,
    pub delay: Duration,
    pub calls: AtomicUsize,
    pub gauge: ConcurrencyGauge,
}

impl StubDownloadTransport {
    pub fn new(delay: Duration) -> Self {
        Self::failing(delay, &[])
    }

    pub fn failing(delay: Duration, artifacts: &[&str]) -> Self {
        Self {
            payload: b"jpeg-bytes".to_vec(),
            failing: artifacts
                .iter()
                .map(|a| format!("https://cdn.test/{a}"))
                .collect(),
            delay,
            calls: AtomicUsize::new(0),
            gauge: ConcurrencyGauge::default(),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DownloadTransport for StubDownloadTransport {
    async fn fetch(
        &self,
        url: &str,
        destination: &Path,
        progress: &ProgressReporter,
    ) -> Result<u64, DriveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.gauge.enter();
        tokio::time::sleep(self.delay).await;
        self.gauge.exit();

        if self.failing.contains(url) {
            tokio::fs::write(destination, &self.payload[..self.payload.len() / 2]).await?;
            return Err(DriveError::Other("connection reset".to_string()));
        }
        tokio::fs::write(destination, &self.payload).await?;
        progress.report(100);
        Ok(self.payload.len() as u64)
    }
}

/// 刷新端点桩：计数、等待 `delay`，然后成功或失败。
pub struct CountingRefreshEndpoint {
    pub calls: AtomicUsize,
    pub delay: Duration,
    pub fail_with: Option<AuthError>,
    pub seen_tokens: Mutex<Vec<String>>,
}

impl CountingRefreshEndpoint {
    pub fn succeeding(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
            fail_with: None,
            seen_tokens: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(delay: Duration, error: AuthError) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
            fail_with: Some(error),
            seen_tokens: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RefreshEndpoint for CountingRefreshEndpoint {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, AuthError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.seen_tokens
            .lock()
            .unwrap()
            .push(refresh_token.to_string());
        tokio::time::sleep(self.delay).await;
        if let Some(error) = &self.fail_with {
            return Err(error.clone());
        }
        Ok(TokenGrant {
            access_token: format!("access-{n}"),
            refresh_token: Some(format!("refresh-{n}")),
            expires_in_seconds: Some(3600),
            scope: None,
            token_type: Some("Bearer".to_string()),
        })
    }
}

/// 轮询 `check` 直到返回 true 或超时。
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    check()
}
