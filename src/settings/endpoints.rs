use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::env;
use url::Url;

pub const DEFAULT_API_BASE: &str = "https://api.photobackup.app/v1/";
pub const DEFAULT_TOKEN_URL: &str = "https://auth.photobackup.app/oauth2/token";
pub const DEFAULT_CLIENT_ID: &str = "photobackup-mobile";

const API_BASE_ENV: &str = "PHOTOBACKUP_API_BASE";
const TOKEN_URL_ENV: &str = "PHOTOBACKUP_TOKEN_URL";
const CLIENT_ID_ENV: &str = "PHOTOBACKUP_CLIENT_ID";
const SCOPE_ENV: &str = "PHOTOBACKUP_SCOPE";

/// 服务端地址与 OAuth 客户端信息。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub api_base: String,
    pub token_url: String,
    pub client_id: String,
    #[serde(default)]
    pub scope: Option<String>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            scope: None,
        }
    }
}

impl EndpointConfig {
    /// 从环境变量读取，未设置的项使用默认值。
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_base: read_env(API_BASE_ENV).unwrap_or(defaults.api_base),
            token_url: read_env(TOKEN_URL_ENV).unwrap_or(defaults.token_url),
            client_id: read_env(CLIENT_ID_ENV).unwrap_or(defaults.client_id),
            scope: read_env(SCOPE_ENV),
        }
    }

    /// 解析 API 根地址；保证以 `/` 结尾，方便后续 `Url::join` 拼接相对路径。
    pub fn api_base_url(&self) -> Result<Url, ConfigError> {
        let mut raw = self.api_base.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        Url::parse(&raw).map_err(|e| ConfigError::InvalidValue {
            key: "api_base".to_string(),
            reason: e.to_string(),
        })
    }

    pub fn token_endpoint(&self) -> Result<Url, ConfigError> {
        Url::parse(self.token_url.trim()).map_err(|e| ConfigError::InvalidValue {
            key: "token_url".to_string(),
            reason: e.to_string(),
        })
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_base_gets_trailing_slash() {
        let config = EndpointConfig {
            api_base: "https://example.test/api/v2".to_string(),
            ..EndpointConfig::default()
        };
        let base = config.api_base_url().unwrap();
        assert_eq!(base.as_str(), "https://example.test/api/v2/");
        assert_eq!(
            base.join("photos/upload-url").unwrap().as_str(),
            "https://example.test/api/v2/photos/upload-url"
        );
    }

    #[test]
    fn invalid_urls_are_config_errors() {
        let config = EndpointConfig {
            token_url: "not a url".to_string(),
            ..EndpointConfig::default()
        };
        assert!(matches!(
            config.token_endpoint(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn config_deserializes_without_scope() {
        let parsed: EndpointConfig = serde_json::from_str(
            r#"{"api_base":"https://a.test/","token_url":"https://a.test/token","client_id":"c"}"#,
        )
        .unwrap();
        assert_eq!(parsed.scope, None);
    }
}
