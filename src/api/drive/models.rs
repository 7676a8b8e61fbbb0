use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};
use uuid::Uuid;

/// 单个任务的进度事件，`percent` 取值 0..=100。
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TransferProgress {
    pub task_id: String,
    pub percent: u8,
}

/// 进度回调：即发即忘，不阻塞传输；在最终结果产生前可能被调用零次或多次。
pub type ProgressCallback = Arc<dyn Fn(TransferProgress) + Send + Sync>;

/// 上传内容来源：本地文件或已经在内存中的字节。
#[derive(Clone, Debug)]
pub enum UploadSource {
    File(PathBuf),
    Bytes(Bytes),
}

/// 上传任务描述，提交后不可变。
#[derive(Clone)]
pub struct UploadTask {
    pub task_id: String,
    pub source: UploadSource,
    pub file_name: String,
    pub content_type: String,
    pub size: Option<u64>,
    pub tags: Vec<String>,
    pub on_progress: Option<ProgressCallback>,
}

impl UploadTask {
    /// 以本地文件创建任务；文件名与 content type 从路径推断。
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.bin".to_string());
        let content_type = guess_content_type(&file_name);
        Self {
            task_id: Uuid::new_v4().to_string(),
            source: UploadSource::File(path),
            file_name,
            content_type,
            size: None,
            tags: Vec::new(),
            on_progress: None,
        }
    }

    pub fn from_bytes(file_name: impl Into<String>, content: impl Into<Bytes>) -> Self {
        let file_name = file_name.into();
        let content = content.into();
        let content_type = guess_content_type(&file_name);
        Self {
            task_id: Uuid::new_v4().to_string(),
            size: Some(content.len() as u64),
            source: UploadSource::Bytes(content),
            file_name,
            content_type,
            tags: Vec::new(),
            on_progress: None,
        }
    }

    pub fn with_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = task_id.into();
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }
}

impl fmt::Debug for UploadTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadTask")
            .field("task_id", &self.task_id)
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("size", &self.size)
            .field("tags", &self.tags)
            .finish_non_exhaustive()
    }
}

/// 下载任务描述：远端对象 id + 本地保存位置。
#[derive(Clone)]
pub struct DownloadTask {
    pub task_id: String,
    pub artifact_id: String,
    pub file_name: String,
    pub target_dir: PathBuf,
    pub on_progress: Option<ProgressCallback>,
}

impl DownloadTask {
    pub fn new(
        artifact_id: impl Into<String>,
        file_name: impl Into<String>,
        target_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            artifact_id: artifact_id.into(),
            file_name: file_name.into(),
            target_dir: target_dir.into(),
            on_progress: None,
        }
    }

    pub fn with_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = task_id.into();
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    /// 本地文件路径：目标目录 + 清洗后的文件名。
    pub fn local_path(&self) -> PathBuf {
        self.target_dir
            .join(super::download::sanitize_file_name(&self.file_name))
    }

    /// 下载中写入的临时文件，成功后才改名为 `local_path`。
    pub fn partial_path(&self) -> PathBuf {
        let name = super::download::sanitize_file_name(&self.file_name);
        self.target_dir.join(format!("{name}.part"))
    }
}

impl fmt::Debug for DownloadTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadTask")
            .field("task_id", &self.task_id)
            .field("artifact_id", &self.artifact_id)
            .field("file_name", &self.file_name)
            .field("target_dir", &self.target_dir)
            .finish_non_exhaustive()
    }
}

/// 任务的最终结果，每个提交的任务恰好产生一个。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskResult {
    pub task_id: String,
    pub outcome: TaskOutcome,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskOutcome {
    Uploaded {
        artifact_id: String,
    },
    Downloaded {
        local_path: PathBuf,
        bytes: u64,
        reused_existing: bool,
    },
    Failed {
        error: String,
    },
}

pub(crate) const CANCELLED_MESSAGE: &str = "cancelled";

impl TaskResult {
    pub fn uploaded(task_id: impl Into<String>, artifact_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            outcome: TaskOutcome::Uploaded {
                artifact_id: artifact_id.into(),
            },
        }
    }

    pub fn downloaded(
        task_id: impl Into<String>,
        local_path: impl Into<PathBuf>,
        bytes: u64,
        reused_existing: bool,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            outcome: TaskOutcome::Downloaded {
                local_path: local_path.into(),
                bytes,
                reused_existing,
            },
        }
    }

    pub fn failed(task_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            outcome: TaskOutcome::Failed {
                error: error.into(),
            },
        }
    }

    pub fn cancelled(task_id: impl Into<String>) -> Self {
        Self::failed(task_id, CANCELLED_MESSAGE)
    }

    pub fn is_success(&self) -> bool {
        !matches!(self.outcome, TaskOutcome::Failed { .. })
    }

    pub fn artifact_id(&self) -> Option<&str> {
        match &self.outcome {
            TaskOutcome::Uploaded { artifact_id } => Some(artifact_id),
            _ => None,
        }
    }

    pub fn local_path(&self) -> Option<&Path> {
        match &self.outcome {
            TaskOutcome::Downloaded { local_path, .. } => Some(local_path),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            TaskOutcome::Failed { error } => Some(error),
            _ => None,
        }
    }
}

/// 申请上传授权时提交给服务端的元数据。
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationRequest {
    pub file_name: String,
    pub content_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    pub tags: Vec<String>,
}

impl AuthorizationRequest {
    pub fn for_task(task: &UploadTask) -> Self {
        Self {
            file_name: task.file_name.clone(),
            content_type: task.content_type.clone(),
            size: task.size,
            tags: task.tags.clone(),
        }
    }
}

/// 服务端签发的上传授权：目标地址（预签名 URL）与服务端分配的 artifact id。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadAuthorization {
    #[serde(alias = "photoId")]
    pub artifact_id: String,
    #[serde(alias = "uploadUrl")]
    pub upload_target: String,
    #[serde(default)]
    pub expires_at: Option<String>,
}

/// 下载地址解析结果。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadTarget {
    pub download_url: String,
    #[serde(default)]
    pub size: Option<u64>,
}

fn guess_content_type(file_name: &str) -> String {
    mime_guess::from_path(file_name)
        .first_or_octet_stream()
        .to_string()
}
