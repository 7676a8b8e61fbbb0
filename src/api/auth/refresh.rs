use super::credentials::{CredentialStore, StoredCredentials};
use crate::api::drive::client::build_client;
use crate::db::current_timestamp_millis;
use crate::error::{AuthError, DriveError};
use crate::settings::EndpointConfig;
use async_trait::async_trait;
use futures::channel::oneshot;
use log::{debug, error, info, warn};
use serde::Deserialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use url::Url;

/// 刷新接口返回的新凭据。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in_seconds: Option<u64>,
    pub scope: Option<String>,
    pub token_type: Option<String>,
}

impl TokenGrant {
    /// 转成可持久化的凭据；服务端没有轮换 refresh token 时沿用旧的。
    pub fn into_credentials(self, previous_refresh: Option<&str>, now_millis: i64) -> StoredCredentials {
        StoredCredentials {
            access_token: self.access_token,
            refresh_token: self
                .refresh_token
                .or_else(|| previous_refresh.map(str::to_string)),
            expires_at_millis: self
                .expires_in_seconds
                .map(|secs| now_millis.saturating_add((secs as i64).saturating_mul(1000))),
            scope: self.scope,
            token_type: self.token_type,
        }
    }
}

/// 刷新端点。实现必须绕过凭据注入路径，刷新请求本身不能再触发刷新。
#[async_trait]
pub trait RefreshEndpoint: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, AuthError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
    scope: Option<String>,
    token_type: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// OAuth refresh_token 授权的 HTTP 实现。持有独立的 `reqwest::Client`，不经过 `AuthSession`。
pub struct HttpRefreshEndpoint {
    client: reqwest::Client,
    token_url: Url,
    client_id: String,
    scope: Option<String>,
}

impl HttpRefreshEndpoint {
    pub fn new(client: reqwest::Client, token_url: Url, client_id: String, scope: Option<String>) -> Self {
        Self {
            client,
            token_url,
            client_id,
            scope,
        }
    }

    pub fn from_config(config: &EndpointConfig) -> Result<Self, DriveError> {
        Ok(Self::new(
            build_client(Duration::from_secs(30))?,
            config.token_endpoint()?,
            config.client_id.clone(),
            config.scope.clone(),
        ))
    }

    fn form_params(&self, refresh_token: &str) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("client_id", self.client_id.clone()),
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.to_string()),
        ];
        let scoped_value = self
            .scope
            .as_deref()
            .map(str::trim)
            .filter(|scope| !scope.is_empty());
        if let Some(value) = scoped_value {
            params.push(("scope", value.to_string()));
        }
        params
    }
}

#[async_trait]
impl RefreshEndpoint for HttpRefreshEndpoint {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, AuthError> {
        let response = self
            .client
            .post(self.token_url.clone())
            .form(&self.form_params(refresh_token))
            .send()
            .await
            .map_err(|e| AuthError::Refresh(e.to_string()))?;

        let status = response.status();
        let payload = response.json::<TokenResponse>().await;
        let payload = match payload {
            Ok(payload) => payload,
            Err(_) if !status.is_success() => return Err(AuthError::Status(status.as_u16())),
            Err(e) => {
                return Err(AuthError::Refresh(format!(
                    "failed to parse token response: {e}"
                )))
            }
        };

        if let Some(error) = payload.error {
            return Err(AuthError::Rejected {
                error,
                description: payload.error_description.unwrap_or_default(),
            });
        }
        if !status.is_success() {
            return Err(AuthError::Status(status.as_u16()));
        }

        let access_token = payload
            .access_token
            .ok_or_else(|| AuthError::Refresh("missing access_token in response".to_string()))?;

        Ok(TokenGrant {
            access_token,
            refresh_token: payload.refresh_token,
            expires_in_seconds: payload.expires_in,
            scope: payload.scope.or_else(|| self.scope.clone()),
            token_type: payload.token_type,
        })
    }
}

/// 单飞刷新协调器：不管有多少调用方同时发现凭据过期，同一时刻最多只有一次刷新请求在途。
///
/// 每个调用方先把自己登记到等待队列；第一个发现"未在刷新"的调用方负责发起刷新。
/// 刷新结束（成功或失败）后一次性清空队列，所有等待者拿到同一个结果，然后才回到未刷新状态。
/// 刷新在独立任务里执行，发起者的 future 被丢弃也不会让其他等待者悬空。
#[derive(Clone)]
pub struct TokenRefreshCoordinator {
    inner: Arc<RefreshInner>,
}

struct RefreshInner {
    state: Mutex<RefreshState>,
    endpoint: Arc<dyn RefreshEndpoint>,
    credentials: Arc<dyn CredentialStore>,
}

#[derive(Default)]
struct RefreshState {
    refreshing: bool,
    pending: Vec<oneshot::Sender<Result<String, AuthError>>>,
}

impl TokenRefreshCoordinator {
    pub fn new(endpoint: Arc<dyn RefreshEndpoint>, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            inner: Arc::new(RefreshInner {
                state: Mutex::new(RefreshState::default()),
                endpoint,
                credentials,
            }),
        }
    }

    pub fn is_refreshing(&self) -> bool {
        self.lock_state().refreshing
    }

    pub fn pending(&self) -> usize {
        self.lock_state().pending.len()
    }

    /// 等待一次刷新结束并返回新的 access token；失败时所有等待者收到同一个错误。
    pub async fn handle_refresh(&self) -> Result<String, AuthError> {
        let (sender, receiver) = oneshot::channel();
        let start = {
            let mut state = self.lock_state();
            state.pending.push(sender);
            if state.refreshing {
                debug!(
                    "[token-refresh] refresh already in flight, queued ({} waiting)",
                    state.pending.len()
                );
                false
            } else {
                state.refreshing = true;
                true
            }
        };

        if start {
            let coordinator = self.clone();
            tokio::spawn(async move { coordinator.run_refresh().await });
        }

        receiver.await.unwrap_or(Err(AuthError::Abandoned))
    }

    async fn run_refresh(&self) {
        let mut guard = SettleGuard {
            coordinator: self,
            settled: false,
        };
        let outcome = self.refresh_once().await;
        match &outcome {
            Ok(_) => info!("[token-refresh] access token refreshed"),
            Err(err) => {
                error!("[token-refresh] refresh failed, clearing stored credentials: {err}");
                // 清理失败不能阻塞调用方，只记录
                if let Err(clear_err) = self.inner.credentials.clear_all().await {
                    warn!("[token-refresh] failed to clear credentials: {clear_err}");
                }
            }
        }
        guard.settled = true;
        self.settle(outcome);
    }

    async fn refresh_once(&self) -> Result<String, AuthError> {
        let refresh_token = self
            .inner
            .credentials
            .load()
            .await
            .and_then(|credentials| credentials.refresh_token)
            .ok_or(AuthError::MissingRefreshToken)?;

        let grant = self.inner.endpoint.refresh(&refresh_token).await?;
        let credentials = grant.into_credentials(Some(&refresh_token), current_timestamp_millis());
        if let Err(err) = self.inner.credentials.save(&credentials).await {
            warn!("[token-refresh] failed to persist refreshed credentials: {err}");
        }
        Ok(credentials.access_token)
    }

    fn settle(&self, outcome: Result<String, AuthError>) {
        let waiters = {
            let mut state = self.lock_state();
            state.refreshing = false;
            std::mem::take(&mut state.pending)
        };
        debug!("[token-refresh] settling {} waiter(s)", waiters.len());
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, RefreshState> {
        match self.inner.state.lock() {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        }
    }
}

/// 刷新任务在结算前被中断（panic 或运行时关闭）时，仍然清空队列并复位状态。
struct SettleGuard<'a> {
    coordinator: &'a TokenRefreshCoordinator,
    settled: bool,
}

impl Drop for SettleGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.coordinator.settle(Err(AuthError::Abandoned));
        }
    }
}
