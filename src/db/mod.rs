mod auth;
mod settings;

pub use auth::AuthTokenRecord;

use crate::error::{StorageError, StorageResult};
use directories::ProjectDirs;
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

const QUALIFIER: &str = "com";
const ORGANIZATION: &str = "Photobackup";
const APPLICATION: &str = "Photobackup";
const DB_FILE_NAME: &str = "photobackup.db";

/// SQLite 数据库句柄。只保存路径，每次操作打开一个连接，建表语句在打开时执行。
#[derive(Clone, Debug)]
pub struct Database {
    path: PathBuf,
}

impl Database {
    /// 使用平台默认的应用数据目录。
    pub fn open_default() -> StorageResult<Self> {
        let dirs = ProjectDirs::from(QUALIFIER, ORGANIZATION, APPLICATION)
            .ok_or(StorageError::DataDirUnavailable)?;
        Ok(Self::at(dirs.data_dir().join(DB_FILE_NAME)))
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn init(&self) -> StorageResult<()> {
        self.with_connection(|_| Ok(()))
    }

    pub(crate) fn with_connection<T, F>(&self, operation: F) -> StorageResult<T>
    where
        F: FnOnce(&Connection) -> StorageResult<T>,
    {
        let conn = self.open_connection()?;
        operation(&conn)
    }

    fn open_connection(&self) -> StorageResult<Connection> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(|source| StorageError::Directory {
                path: dir.to_string_lossy().into_owned(),
                source,
            })?;
        }

        let conn = Connection::open(&self.path)?;
        apply_migrations(&conn)?;
        Ok(conn)
    }
}

fn apply_migrations(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(auth::AUTH_TABLE_SCHEMA)?;
    conn.execute_batch(settings::SETTINGS_TABLE_SCHEMA)?;
    Ok(())
}

pub(crate) fn current_timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as i64)
        .unwrap_or(0)
}
