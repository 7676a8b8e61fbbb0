use super::credentials::CredentialStore;
use super::refresh::TokenRefreshCoordinator;
use crate::db::current_timestamp_millis;
use crate::error::AuthError;
use log::debug;
use std::sync::Arc;
use std::time::Duration;

/// 提前刷新的余量，避免请求在路上时 token 恰好过期。
pub const DEFAULT_EXPIRY_SKEW: Duration = Duration::from_secs(60);

/// 带凭据的请求入口：取 token、必要时经协调器刷新。
#[derive(Clone)]
pub struct AuthSession {
    credentials: Arc<dyn CredentialStore>,
    refresher: TokenRefreshCoordinator,
    skew: Duration,
}

impl AuthSession {
    pub fn new(credentials: Arc<dyn CredentialStore>, refresher: TokenRefreshCoordinator) -> Self {
        Self {
            credentials,
            refresher,
            skew: DEFAULT_EXPIRY_SKEW,
        }
    }

    pub fn with_skew(mut self, skew: Duration) -> Self {
        self.skew = skew;
        self
    }

    pub fn refresher(&self) -> &TokenRefreshCoordinator {
        &self.refresher
    }

    /// 返回可用的 access token；缺失或即将过期时等待一次（共享的）刷新。
    pub async fn access_token(&self) -> Result<String, AuthError> {
        match self.credentials.load().await {
            Some(credentials)
                if !credentials.access_token.is_empty()
                    && !credentials.is_expiring(current_timestamp_millis(), self.skew) =>
            {
                Ok(credentials.access_token)
            }
            _ => {
                debug!("[auth-session] access token missing or expiring, refreshing");
                self.refresher.handle_refresh().await
            }
        }
    }

    /// 服务端返回 401 后调用。
    pub async fn force_refresh(&self) -> Result<String, AuthError> {
        self.refresher.handle_refresh().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::auth::credentials::{MemoryCredentialStore, StoredCredentials};
    use crate::api::auth::refresh::{RefreshEndpoint, TokenGrant};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEndpoint {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RefreshEndpoint for CountingEndpoint {
        async fn refresh(&self, _refresh_token: &str) -> Result<TokenGrant, AuthError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(TokenGrant {
                access_token: format!("refreshed-{n}"),
                refresh_token: None,
                expires_in_seconds: Some(3600),
                scope: None,
                token_type: None,
            })
        }
    }

    fn session_with(initial: StoredCredentials) -> (AuthSession, Arc<CountingEndpoint>) {
        let store: Arc<dyn CredentialStore> = Arc::new(MemoryCredentialStore::new(Some(initial)));
        let endpoint = Arc::new(CountingEndpoint {
            calls: AtomicUsize::new(0),
        });
        let coordinator = TokenRefreshCoordinator::new(endpoint.clone(), store.clone());
        (AuthSession::new(store, coordinator), endpoint)
    }

    #[tokio::test]
    async fn valid_token_is_used_without_refresh() {
        let far_future = current_timestamp_millis() + 3_600_000;
        let (session, endpoint) =
            session_with(StoredCredentials::new("cached").with_refresh_token("r").with_expiry(far_future));
        assert_eq!(session.access_token().await.unwrap(), "cached");
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn expiring_token_is_refreshed_and_persisted() {
        let (session, endpoint) =
            session_with(StoredCredentials::new("stale").with_refresh_token("r").with_expiry(0));
        assert_eq!(session.access_token().await.unwrap(), "refreshed-1");
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 1);
        // 新 token 已落盘，下一次直接命中
        assert_eq!(session.access_token().await.unwrap(), "refreshed-1");
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 1);
    }
}
