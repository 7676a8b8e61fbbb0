pub mod api;
pub mod db;
pub mod download_manager;
pub mod error;
pub mod queue;
pub mod semaphore;
pub mod settings;
pub mod upload_manager;

pub use api::auth::{AuthSession, CredentialStore, StoredCredentials, TokenRefreshCoordinator};
pub use api::drive::{DownloadTask, TaskOutcome, TaskResult, TransferProgress, UploadTask};
pub use api::PhotoBackupService;
pub use download_manager::DownloadManager;
pub use error::{AuthError, ConfigError, DriveError, QueueError};
pub use queue::{ProgressReporter, QueueStatus, RunState};
pub use semaphore::Semaphore;
pub use settings::QueueManagerConfig;
pub use upload_manager::UploadManager;
