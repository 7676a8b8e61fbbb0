use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};

/// 正在被某个下载任务写入的本地路径。
///
/// 两个任务落到同一个目标文件（例如不同照片同名）时，后到的任务直接失败，
/// 不会与前一个任务同时写同一个文件，也不会在失败清理时删掉对方的结果。
#[derive(Clone, Default)]
pub(crate) struct DestinationClaims {
    inner: Arc<Mutex<HashSet<PathBuf>>>,
}

impl DestinationClaims {
    /// 路径已被占用时返回 None。
    pub(crate) fn claim(&self, path: &Path) -> Option<DestinationClaim> {
        let mut claimed = self.lock();
        if !claimed.insert(path.to_path_buf()) {
            return None;
        }
        Some(DestinationClaim {
            claims: self.clone(),
            path: path.to_path_buf(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        }
    }
}

/// 占用凭证，drop 时释放路径。
pub(crate) struct DestinationClaim {
    claims: DestinationClaims,
    path: PathBuf,
}

impl Drop for DestinationClaim {
    fn drop(&mut self) {
        self.claims.lock().remove(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claim_waits_for_release() {
        let claims = DestinationClaims::default();
        let path = Path::new("/photos/IMG_0001.jpg");

        let first = claims.claim(path).unwrap();
        assert!(claims.claim(path).is_none());
        assert!(claims.claim(Path::new("/photos/IMG_0002.jpg")).is_some());

        drop(first);
        assert!(claims.claim(path).is_some());
    }
}
