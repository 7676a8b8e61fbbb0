use thiserror::Error;

/// 构造队列管理器时的配置错误，属于调用方误用，直接拒绝。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("max_concurrent must be greater than zero")]
    ZeroConcurrency,
    #[error("batch_size must be greater than zero")]
    ZeroBatchSize,
    #[error("invalid {key} value: {reason}")]
    InvalidValue { key: String, reason: String },
}

/// `add_tasks` 层面的误用；单个任务的失败不会走这里。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("task id is required")]
    EmptyTaskId,
    #[error("task {0} is already queued")]
    DuplicateTask(String),
}

/// 凭据刷新相关错误。需要 `Clone`：同一次刷新失败会原样拒绝所有排队的请求。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("no refresh token available; interactive authentication required")]
    MissingRefreshToken,
    #[error("token refresh failed: {0}")]
    Refresh(String),
    #[error("token endpoint returned HTTP {0}")]
    Status(u16),
    #[error("{error}: {description}")]
    Rejected { error: String, description: String },
    #[error("token refresh was abandoned before it settled")]
    Abandoned,
}

/// 外部协作方（授权、传输、完成上报、下载）返回的错误；最终会被字符串化写入任务结果。
#[derive(Debug, Error)]
pub enum DriveError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{context} returned HTTP {status}")]
    Status { context: &'static str, status: u16 },
    #[error("access token rejected by server; please sign in again")]
    Unauthorized,
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to create database directory {path}: {source}")]
    Directory {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to resolve application data directory")]
    DataDirUnavailable,
    #[error("storage task did not finish: {0}")]
    Blocking(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// 组装服务时可能出现的错误。
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Drive(#[from] DriveError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
