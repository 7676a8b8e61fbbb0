use crate::db::{AuthTokenRecord, Database};
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use log::warn;
use std::sync::Mutex;
use std::time::Duration;

/// 当前持有的凭据。`expires_at_millis` 为绝对时间（Unix 毫秒），缺失表示未知。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredCredentials {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at_millis: Option<i64>,
    pub scope: Option<String>,
    pub token_type: Option<String>,
}

impl StoredCredentials {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at_millis: None,
            scope: None,
            token_type: None,
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    pub fn with_expiry(mut self, expires_at_millis: i64) -> Self {
        self.expires_at_millis = Some(expires_at_millis);
        self
    }

    /// 是否已过期或将在 `skew` 内过期。过期时间未知时视为仍然有效，由 401 兜底。
    pub fn is_expiring(&self, now_millis: i64, skew: Duration) -> bool {
        match self.expires_at_millis {
            Some(expires_at) => now_millis.saturating_add(skew.as_millis() as i64) >= expires_at,
            None => false,
        }
    }
}

impl From<AuthTokenRecord> for StoredCredentials {
    fn from(record: AuthTokenRecord) -> Self {
        Self {
            access_token: record.access_token,
            refresh_token: record.refresh_token,
            expires_at_millis: record.expires_at_millis,
            scope: record.scope,
            token_type: record.token_type,
        }
    }
}

/// 凭据存储协作方。必须可以并发调用；读取失败退化为"没有凭据"，不向上抛错。
/// 在异步上下文中调用，实现不能阻塞执行器线程。
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load(&self) -> Option<StoredCredentials>;
    async fn save(&self, credentials: &StoredCredentials) -> Result<(), StorageError>;
    async fn clear_all(&self) -> Result<(), StorageError>;

    async fn access_token(&self) -> Option<String> {
        self.load().await.map(|credentials| credentials.access_token)
    }

    /// 只替换 access token，保留其余字段。
    async fn set_access_token(&self, token: &str) -> Result<(), StorageError> {
        let mut credentials = self
            .load()
            .await
            .unwrap_or_else(|| StoredCredentials::new(token));
        credentials.access_token = token.to_string();
        self.save(&credentials).await
    }
}

/// 默认实现：落在 SQLite 的 auth_tokens 表。rusqlite 是同步 API，每次操作放到阻塞线程池执行。
pub struct SqliteCredentialStore {
    db: Database,
}

impl SqliteCredentialStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    async fn blocking<T, F>(&self, operation: F) -> StorageResult<T>
    where
        F: FnOnce(&Database) -> StorageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || operation(&db))
            .await
            .map_err(|err| StorageError::Blocking(err.to_string()))?
    }
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn load(&self) -> Option<StoredCredentials> {
        match self.blocking(|db| db.load_auth_record()).await {
            Ok(record) => record.map(StoredCredentials::from),
            Err(err) => {
                warn!("[credential-store] failed to read credentials: {err}");
                None
            }
        }
    }

    async fn save(&self, credentials: &StoredCredentials) -> Result<(), StorageError> {
        let record = AuthTokenRecord {
            access_token: credentials.access_token.clone(),
            refresh_token: credentials.refresh_token.clone(),
            expires_at_millis: credentials.expires_at_millis,
            scope: credentials.scope.clone(),
            token_type: credentials.token_type.clone(),
            updated_at_millis: 0,
        };
        self.blocking(move |db| db.upsert_auth_record(&record)).await
    }

    async fn clear_all(&self) -> Result<(), StorageError> {
        self.blocking(|db| db.clear_auth_record()).await
    }
}

/// 纯内存实现，用于不需要持久化的场景和测试。
#[derive(Default)]
pub struct MemoryCredentialStore {
    inner: Mutex<Option<StoredCredentials>>,
}

impl MemoryCredentialStore {
    pub fn new(initial: Option<StoredCredentials>) -> Self {
        Self {
            inner: Mutex::new(initial),
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self) -> Option<StoredCredentials> {
        match self.inner.lock() {
            Ok(guard) => guard.clone(),
            Err(poison) => poison.into_inner().clone(),
        }
    }

    async fn save(&self, credentials: &StoredCredentials) -> Result<(), StorageError> {
        let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        *guard = Some(credentials.clone());
        Ok(())
    }

    async fn clear_all(&self) -> Result<(), StorageError> {
        let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        *guard = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_uses_skew() {
        let credentials = StoredCredentials::new("a").with_expiry(100_000);
        assert!(!credentials.is_expiring(0, Duration::from_secs(60)));
        assert!(credentials.is_expiring(50_000, Duration::from_secs(60)));
        assert!(credentials.is_expiring(100_000, Duration::ZERO));
        assert!(!StoredCredentials::new("b").is_expiring(i64::MAX, Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn sqlite_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteCredentialStore::new(Database::at(dir.path().join("auth.db")));
        assert_eq!(store.access_token().await, None);

        store.set_access_token("first").await.unwrap();
        assert_eq!(store.access_token().await.as_deref(), Some("first"));

        let credentials = StoredCredentials::new("second")
            .with_refresh_token("r-1")
            .with_expiry(42);
        store.save(&credentials).await.unwrap();
        assert_eq!(store.load().await, Some(credentials));

        store.set_access_token("third").await.unwrap();
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.access_token, "third");
        assert_eq!(loaded.refresh_token.as_deref(), Some("r-1"));

        store.clear_all().await.unwrap();
        assert_eq!(store.load().await, None);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn sqlite_store_serves_concurrent_callers_on_single_thread_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteCredentialStore::new(Database::at(dir.path().join("auth.db")));
        store
            .save(&StoredCredentials::new("token").with_refresh_token("r"))
            .await
            .unwrap();

        let (loaded, replaced) = tokio::join!(
            futures::future::join_all((0..4).map(|_| store.load())),
            store.set_access_token("rotated"),
        );

        replaced.unwrap();
        assert!(loaded.iter().all(Option::is_some));
        let current = store.load().await.unwrap();
        assert_eq!(current.access_token, "rotated");
        assert_eq!(current.refresh_token.as_deref(), Some("r"));
    }

    #[tokio::test]
    async fn unreadable_database_degrades_to_no_credentials() {
        let dir = tempfile::tempdir().unwrap();
        // 路径是一个目录，打开 SQLite 会失败
        let store = SqliteCredentialStore::new(Database::at(dir.path()));
        assert_eq!(store.load().await, None);
        assert!(store.clear_all().await.is_err());
    }
}
