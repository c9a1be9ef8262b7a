//! Conjur secret provider.
//!
//! Authenticates with a host or user API key and reads variables through the
//! Conjur REST API:
//!
//! - `POST {url}/authn/{account}/{login}/authenticate` exchanges the API key
//!   for a short-lived access token.
//! - `GET {url}/secrets/{account}/variable/{id}` returns the raw value.
//!
//! Access tokens are valid for eight minutes. The provider caches one and
//! re-authenticates once it is older than [`CONJUR_TOKEN_REFRESH_SECS`].

use super::error::ProviderError;
use super::types::{Provider, Variables};
use crate::config::{CONJUR_TOKEN_REFRESH_SECS, PROVIDER_REQUEST_TIMEOUT_SECS};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::StatusCode;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;

/// Connection settings, resolved from the provider's configuration and
/// credentials maps.
#[derive(Clone)]
pub struct ConjurConfig {
    pub url: Url,
    pub account: String,
    pub username: String,
    pub api_key: String,
}

impl ConjurConfig {
    /// Build from resolved `configuration` (`url`, `account`) and
    /// `credentials` (`username`, `api_key`).
    pub fn from_variables(
        configuration: &Variables,
        credentials: &Variables,
    ) -> Result<Self, ProviderError> {
        let field = |vars: &Variables, name: &str| -> Result<String, ProviderError> {
            vars.require_str(name)
                .map(str::to_string)
                .map_err(|e| ProviderError::config(e.to_string()))
        };

        let raw_url = field(configuration, "url")?;
        let url = Url::parse(&raw_url)
            .map_err(|e| ProviderError::config(format!("invalid Conjur url '{raw_url}': {e}")))?;
        if url.cannot_be_a_base() {
            return Err(ProviderError::config(format!(
                "Conjur url '{raw_url}' cannot carry a path"
            )));
        }

        Ok(Self {
            url,
            account: field(configuration, "account")?,
            username: field(credentials, "username")?,
            api_key: field(credentials, "api_key")?,
        })
    }
}

impl std::fmt::Debug for ConjurConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConjurConfig")
            .field("url", &self.url.as_str())
            .field("account", &self.account)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

struct AccessToken {
    header: String,
    fetched_at: Instant,
}

/// Reads secrets from a Conjur server.
pub struct ConjurProvider {
    name: String,
    config: ConjurConfig,
    client: reqwest::Client,
    token: Mutex<Option<AccessToken>>,
}

impl ConjurProvider {
    /// Create the provider and authenticate once, so bad credentials fail at
    /// startup rather than on the first client connection.
    pub async fn new(name: impl Into<String>, config: ConjurConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(PROVIDER_REQUEST_TIMEOUT_SECS))
            .build()?;

        let provider = Self {
            name: name.into(),
            config,
            client,
            token: Mutex::new(None),
        };

        provider.authorization().await?;
        info!(
            "Authenticated to Conjur at {} as '{}'",
            provider.config.url, provider.config.username
        );
        Ok(provider)
    }

    /// Build `{url}/{segments...}`, percent-encoding each segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ProviderError> {
        let mut url = self.config.url.clone();
        url.path_segments_mut()
            .map_err(|_| ProviderError::config("Conjur url cannot carry a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn authenticate(&self) -> Result<AccessToken, ProviderError> {
        let url = self.endpoint(&[
            "authn",
            &self.config.account,
            &self.config.username,
            "authenticate",
        ])?;

        debug!("Authenticating to Conjur as '{}'", self.config.username);
        let response = self
            .client
            .post(url)
            .body(self.config.api_key.clone())
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {
                let token = response.bytes().await?;
                Ok(AccessToken {
                    header: format!("Token token=\"{}\"", STANDARD.encode(&token)),
                    fetched_at: Instant::now(),
                })
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(ProviderError::authentication_failed(format!(
                    "Conjur rejected the API key for '{}' ({})",
                    self.config.username,
                    response.status()
                )))
            }
            status => Err(ProviderError::backend(format!(
                "Conjur authentication returned {status}"
            ))),
        }
    }

    /// The `Authorization` header value, re-authenticating when stale.
    async fn authorization(&self) -> Result<String, ProviderError> {
        let mut token = self.token.lock().await;

        let fresh = token.as_ref().is_some_and(|t| {
            t.fetched_at.elapsed() < Duration::from_secs(CONJUR_TOKEN_REFRESH_SECS)
        });
        if !fresh {
            *token = Some(self.authenticate().await?);
        }

        token
            .as_ref()
            .map(|t| t.header.clone())
            .ok_or_else(|| ProviderError::authentication_failed("no access token"))
    }
}

#[async_trait]
impl Provider for ConjurProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn value(&self, id: &str) -> Result<Vec<u8>, ProviderError> {
        let url = self.endpoint(&["secrets", &self.config.account, "variable", id])?;
        let authorization = self.authorization().await?;

        let response = self
            .client
            .get(url)
            .header(reqwest::header::AUTHORIZATION, authorization)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(response.bytes().await?.to_vec()),
            StatusCode::NOT_FOUND => Err(ProviderError::not_found(id)),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(ProviderError::authentication_failed(format!(
                    "'{}' may not read variable '{id}' ({})",
                    self.config.username,
                    response.status()
                )))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(ProviderError::backend(format!(
                    "reading variable '{id}' returned {status}: {}",
                    body.trim()
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TOKEN: &str = r#"{"protected":"eyJhbGciOiJjb25qdXIub3JnL3Nsb3NpbG8vdjIifQ==","payload":"e30=","signature":"c2ln"}"#;

    fn vars(entries: &[(&str, &str)]) -> Variables {
        Variables::new(
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
                .collect::<HashMap<_, _>>(),
        )
    }

    fn config(server: &MockServer) -> ConjurConfig {
        ConjurConfig::from_variables(
            &vars(&[("url", &server.uri()), ("account", "myorg")]),
            &vars(&[("username", "admin"), ("api_key", "api-key-123")]),
        )
        .unwrap()
    }

    async fn mount_authn(server: &MockServer, expected_calls: u64) {
        Mock::given(method("POST"))
            .and(path("/authn/myorg/admin/authenticate"))
            .and(body_string("api-key-123"))
            .respond_with(ResponseTemplate::new(200).set_body_string(TOKEN))
            .expect(expected_calls)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn reads_variable_with_token_header() {
        let server = MockServer::start().await;
        mount_authn(&server, 1).await;

        let expected = format!("Token token=\"{}\"", STANDARD.encode(TOKEN));
        Mock::given(method("GET"))
            .and(path("/secrets/myorg/variable/db-password"))
            .and(header("authorization", expected.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_string("s3cr3t"))
            .mount(&server)
            .await;

        let provider = ConjurProvider::new("conjur", config(&server)).await.unwrap();
        assert_eq!(provider.name(), "conjur");
        assert_eq!(provider.value("db-password").await.unwrap(), b"s3cr3t");
        // Cached token: still a single authn call.
        assert_eq!(provider.value("db-password").await.unwrap(), b"s3cr3t");
    }

    #[tokio::test]
    async fn rejected_api_key_fails_construction() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = ConjurProvider::new("conjur", config(&server))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ProviderError::AuthenticationFailed { .. }));
    }

    #[tokio::test]
    async fn missing_variable_is_not_found() {
        let server = MockServer::start().await;
        mount_authn(&server, 1).await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let provider = ConjurProvider::new("conjur", config(&server)).await.unwrap();
        let err = provider.value("absent").await.unwrap_err();
        assert!(matches!(err, ProviderError::NotFound { .. }));
    }

    #[tokio::test]
    async fn endpoint_encodes_variable_ids() {
        let server = MockServer::start().await;
        mount_authn(&server, 1).await;

        let provider = ConjurProvider::new("conjur", config(&server)).await.unwrap();
        let url = provider
            .endpoint(&["secrets", "myorg", "variable", "prod/db password"])
            .unwrap();
        assert_eq!(url.path(), "/secrets/myorg/variable/prod%2Fdb%20password");
    }

    #[test]
    fn config_requires_every_field() {
        let err = ConjurConfig::from_variables(
            &vars(&[("url", "https://conjur.example.com")]),
            &vars(&[("username", "admin"), ("api_key", "k")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("account"));

        let err = ConjurConfig::from_variables(
            &vars(&[("url", "not a url"), ("account", "myorg")]),
            &vars(&[("username", "admin"), ("api_key", "k")]),
        )
        .unwrap_err();
        assert!(matches!(err, ProviderError::Config { .. }));
    }

    #[test]
    fn debug_hides_api_key() {
        let config = ConjurConfig::from_variables(
            &vars(&[("url", "https://conjur.example.com"), ("account", "myorg")]),
            &vars(&[("username", "admin"), ("api_key", "very-secret")]),
        )
        .unwrap();
        assert!(!format!("{config:?}").contains("very-secret"));
    }
}
