use async_trait::async_trait;
use std::{io, path::Path};

/// 本地存储协作方：下载流程只需要存在性检查、建目录、落盘改名和清理半成品文件。
/// 实际写入由下载传输负责，它拿到的是临时文件路径。
#[async_trait]
pub trait LocalStorage: Send + Sync {
    async fn exists(&self, path: &Path) -> bool;
    async fn create_dir_all(&self, dir: &Path) -> io::Result<()>;
    async fn remove_file(&self, path: &Path) -> io::Result<()>;
    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
}

/// 默认实现：直接走 `tokio::fs`。
#[derive(Clone, Copy, Debug, Default)]
pub struct FsLocalStorage;

impl FsLocalStorage {
    pub fn new() -> Self {
        FsLocalStorage
    }
}

#[async_trait]
impl LocalStorage for FsLocalStorage {
    async fn exists(&self, path: &Path) -> bool {
        match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata.is_file(),
            Err(_) => false,
        }
    }

    async fn create_dir_all(&self, dir: &Path) -> io::Result<()> {
        tokio::fs::create_dir_all(dir).await
    }

    async fn remove_file(&self, path: &Path) -> io::Result<()> {
        match tokio::fs::remove_file(path).await {
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        tokio::fs::rename(from, to).await
    }
}
