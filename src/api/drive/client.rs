use super::endpoints::{CompletionReporter, DownloadUrlResolver, UploadAuthorizer};
use super::models::{AuthorizationRequest, DownloadTarget, UploadAuthorization};
use crate::api::auth::AuthSession;
use crate::error::DriveError;
use async_trait::async_trait;
use log::{debug, warn};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::{redirect::Policy, Client, RequestBuilder, Response, StatusCode};
use std::time::Duration;
use url::Url;

/// 构建一个带有统一超时与重定向策略的 HTTP 客户端。
/// 所有服务端调用应尽量复用该函数，避免重复配置。
pub(crate) fn build_client(timeout: Duration) -> Result<Client, DriveError> {
    Client::builder()
        .timeout(timeout)
        .redirect(Policy::limited(10))
        .build()
        .map_err(|e| DriveError::Other(format!("failed to build HTTP client: {e}")))
}

/// 照片服务 API。所有请求经 `AuthSession` 注入 bearer token，401 时刷新后重试一次。
#[derive(Clone)]
pub struct DriveApi {
    http: Client,
    base_url: Url,
    session: AuthSession,
}

impl DriveApi {
    pub fn new(http: Client, base_url: Url, session: AuthSession) -> Self {
        Self {
            http,
            base_url,
            session,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, DriveError> {
        self.base_url
            .join(path)
            .map_err(|e| DriveError::Other(format!("invalid endpoint {path}: {e}")))
    }

    async fn send_authorized<F>(&self, build: F) -> Result<Response, DriveError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let token = self.session.access_token().await?;
        let response = build(&self.http).bearer_auth(token).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        debug!("[photo-api] access token rejected, refreshing and retrying once");
        let token = self.session.force_refresh().await?;
        let response = build(&self.http).bearer_auth(token).send().await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            warn!("[photo-api] access token rejected after refresh");
            return Err(DriveError::Unauthorized);
        }
        Ok(response)
    }
}

fn ensure_success(response: Response, context: &'static str) -> Result<Response, DriveError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(DriveError::Status {
            context,
            status: status.as_u16(),
        })
    }
}

fn encode_id(id: &str) -> String {
    utf8_percent_encode(id.trim(), NON_ALPHANUMERIC).to_string()
}

#[async_trait]
impl UploadAuthorizer for DriveApi {
    async fn authorize(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<UploadAuthorization, DriveError> {
        let url = self.endpoint("photos/upload-url")?;
        let response = self
            .send_authorized(|client| client.post(url.clone()).json(request))
            .await?;
        let response = ensure_success(response, "upload authorization")?;
        Ok(response.json::<UploadAuthorization>().await?)
    }
}

#[async_trait]
impl CompletionReporter for DriveApi {
    async fn report_complete(&self, artifact_id: &str) -> Result<(), DriveError> {
        let url = self.endpoint(&format!("photos/{}/complete", encode_id(artifact_id)))?;
        let response = self
            .send_authorized(|client| client.post(url.clone()))
            .await?;
        ensure_success(response, "upload completion")?;
        Ok(())
    }
}

#[async_trait]
impl DownloadUrlResolver for DriveApi {
    async fn resolve(&self, artifact_id: &str) -> Result<DownloadTarget, DriveError> {
        let url = self.endpoint(&format!("photos/{}/download-url", encode_id(artifact_id)))?;
        let response = self
            .send_authorized(|client| {
                client
                    .get(url.clone())
                    .header("Accept", "application/json")
            })
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(DriveError::Other(format!(
                "photo {artifact_id} not found; it may have been deleted"
            )));
        }
        let response = ensure_success(response, "download url lookup")?;
        Ok(response.json::<DownloadTarget>().await?)
    }
}
