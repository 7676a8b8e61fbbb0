use super::auth::{
    AuthSession, CredentialStore, HttpRefreshEndpoint, SqliteCredentialStore, StoredCredentials,
    TokenRefreshCoordinator,
};
use super::drive::{
    client::build_client, DownloadTask, DriveApi, HttpDownloadTransport, HttpUploadTransport,
};
use crate::db::Database;
use crate::download_manager::{DownloadManager, FsLocalStorage};
use crate::error::{ServiceError, StorageResult};
use crate::settings::{get_download_directory, load_queue_config, EndpointConfig, QueueKind};
use crate::upload_manager::UploadManager;
use log::info;
use std::sync::Arc;
use std::time::Duration;

const API_TIMEOUT: Duration = Duration::from_secs(30);
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(600);

/// 应用侧的组装入口：一个数据库、一套凭据、一个刷新协调器、一对队列管理器。
///
/// 所有协作方都通过构造注入；需要替换实现（测试、别的后端）时直接使用各管理器的 `new`。
#[derive(Clone)]
pub struct PhotoBackupService {
    db: Database,
    credentials: Arc<dyn CredentialStore>,
    session: AuthSession,
    uploads: UploadManager,
    downloads: DownloadManager,
}

impl PhotoBackupService {
    /// 使用平台默认数据目录和环境变量中的服务端配置。
    pub fn open_default() -> Result<Self, ServiceError> {
        Self::open(Database::open_default()?, EndpointConfig::from_env())
    }

    pub fn open(db: Database, endpoints: EndpointConfig) -> Result<Self, ServiceError> {
        db.init()?;
        let upload_config = load_queue_config(&db, QueueKind::Upload)?;
        let download_config = load_queue_config(&db, QueueKind::Download)?;

        let credentials: Arc<dyn CredentialStore> = Arc::new(SqliteCredentialStore::new(db.clone()));
        let refresher = TokenRefreshCoordinator::new(
            Arc::new(HttpRefreshEndpoint::from_config(&endpoints)?),
            credentials.clone(),
        );
        let session = AuthSession::new(credentials.clone(), refresher);
        let api = Arc::new(DriveApi::new(
            build_client(API_TIMEOUT)?,
            endpoints.api_base_url()?,
            session.clone(),
        ));

        let uploads = UploadManager::new(
            upload_config,
            api.clone(),
            Arc::new(HttpUploadTransport::with_timeout(TRANSFER_TIMEOUT)?),
            api.clone(),
        )?;
        let downloads = DownloadManager::new(
            download_config,
            api,
            Arc::new(HttpDownloadTransport::with_timeout(TRANSFER_TIMEOUT)?),
            Arc::new(FsLocalStorage::new()),
        )?;

        info!(
            "[photo-service] ready (uploads: {} concurrent / batch {}, downloads: {} concurrent)",
            upload_config.max_concurrent, upload_config.batch_size, download_config.max_concurrent
        );

        Ok(Self {
            db,
            credentials,
            session,
            uploads,
            downloads,
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn session(&self) -> &AuthSession {
        &self.session
    }

    pub fn uploads(&self) -> &UploadManager {
        &self.uploads
    }

    pub fn downloads(&self) -> &DownloadManager {
        &self.downloads
    }

    /// 保存外部登录流程拿到的凭据。
    pub async fn sign_in(&self, credentials: &StoredCredentials) -> StorageResult<()> {
        self.credentials.save(credentials).await
    }

    pub async fn sign_out(&self) -> StorageResult<()> {
        self.uploads.cancel_all();
        self.downloads.cancel_all();
        self.credentials.clear_all().await
    }

    pub async fn is_signed_in(&self) -> bool {
        self.credentials.load().await.is_some()
    }

    /// 以配置的下载目录构造下载任务。
    pub fn download_task(
        &self,
        artifact_id: impl Into<String>,
        file_name: impl Into<String>,
    ) -> StorageResult<DownloadTask> {
        let target_dir = get_download_directory(&self.db)?;
        Ok(DownloadTask::new(artifact_id, file_name, target_dir))
    }
}
