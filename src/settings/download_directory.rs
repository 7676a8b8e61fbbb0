use crate::db::Database;
use crate::error::{ConfigError, StorageError, StorageResult};
use directories::UserDirs;
use std::path::PathBuf;

const DOWNLOAD_DIR_KEY: &str = "download_directory";

pub fn get_download_directory(db: &Database) -> StorageResult<PathBuf> {
    if let Some(value) = db.get_setting(DOWNLOAD_DIR_KEY)? {
        return Ok(PathBuf::from(value));
    }
    default_download_directory()
}

pub fn set_download_directory(db: &Database, path: &str) -> StorageResult<PathBuf> {
    if path.trim().is_empty() {
        return Err(ConfigError::InvalidValue {
            key: DOWNLOAD_DIR_KEY.to_string(),
            reason: "download directory cannot be empty".to_string(),
        }
        .into());
    }
    db.set_setting(DOWNLOAD_DIR_KEY, path.trim())?;
    Ok(PathBuf::from(path.trim()))
}

/// 默认下载到用户的“下载”目录（缺失时退回 home）下的 photobackup 子目录。
pub fn default_download_directory() -> StorageResult<PathBuf> {
    if let Some(user_dirs) = UserDirs::new() {
        let base = user_dirs.download_dir().unwrap_or(user_dirs.home_dir());
        return Ok(base.join("photobackup"));
    }
    Err(StorageError::DataDirUnavailable)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_directory_wins_over_default() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::at(dir.path().join("settings.db"));
        assert!(set_download_directory(&db, "   ").is_err());

        let target = dir.path().join("photos");
        let target_str = target.to_string_lossy().into_owned();
        set_download_directory(&db, &target_str).unwrap();
        assert_eq!(get_download_directory(&db).unwrap(), target);
    }
}
