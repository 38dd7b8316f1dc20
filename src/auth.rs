//! Credential supply for the remote API
//!
//! The core only needs a bearer token and a way to renew it. [`TokenProvider`] is
//! that seam; [`FileTokenProvider`] implements it on top of an "authorized user"
//! token file (the format Google's client libraries write after the consent flow)
//! and the OAuth 2.0 refresh-token grant. [`StaticToken`] wraps a pre-minted
//! token for tests and short-lived scripts.

use crate::config::AuthConfig;
use crate::error::{AuthError, Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Default OAuth token endpoint
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Tokens this close to expiry are renewed before use
const EXPIRY_SKEW_SECS: i64 = 60;

/// Source of bearer tokens for API calls
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Return a token believed to be valid, renewing it first if it is known to be stale
    async fn access_token(&self) -> Result<String>;

    /// Renew the token unconditionally (called after the API rejected the current one)
    async fn refresh(&self) -> Result<String>;
}

/// A fixed token that cannot be renewed
pub struct StaticToken(String);

impl StaticToken {
    /// Wrap an existing bearer token
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self) -> Result<String> {
        Ok(self.0.clone())
    }

    async fn refresh(&self) -> Result<String> {
        Err(AuthError::NoRefreshToken.into())
    }
}

/// Contents of an authorized-user token file
///
/// Unknown fields are carried through untouched when the file is rewritten.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuthorizedUser {
    /// Current access token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Long-lived refresh token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Token endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_uri: Option<String>,
    /// OAuth client id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// OAuth client secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    /// Scopes granted to the token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
    /// Access token expiry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

impl AuthorizedUser {
    /// True when an access token is present and not about to expire
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        match (&self.token, self.expiry) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(_), Some(expiry)) => expiry - chrono::Duration::seconds(EXPIRY_SKEW_SECS) > now,
        }
    }
}

/// `installed` / `web` section of a client secrets file
#[derive(Debug, Deserialize)]
struct ClientSecret {
    client_id: String,
    client_secret: String,
    #[serde(default)]
    token_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClientSecretsFile {
    #[serde(default)]
    installed: Option<ClientSecret>,
    #[serde(default)]
    web: Option<ClientSecret>,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Token provider backed by an authorized-user token file
pub struct FileTokenProvider {
    path: PathBuf,
    http_client: reqwest::Client,
    state: Mutex<AuthorizedUser>,
}

impl FileTokenProvider {
    /// Load the token file named in `config`
    ///
    /// Client credentials missing from the token file are taken from the client
    /// secrets file when it exists.
    ///
    /// # Errors
    /// Returns [`AuthError::MissingToken`] when the token file does not exist and
    /// [`AuthError::InvalidToken`] when it cannot be parsed.
    pub async fn load(config: &AuthConfig, http_client: reqwest::Client) -> Result<Self> {
        let path = config.token_path.clone();
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AuthError::MissingToken { path }.into());
            }
            Err(e) => {
                return Err(AuthError::InvalidToken {
                    path,
                    reason: e.to_string(),
                }
                .into());
            }
        };

        let mut user: AuthorizedUser =
            serde_json::from_str(&text).map_err(|e| AuthError::InvalidToken {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        if user.client_id.is_none() || user.client_secret.is_none() {
            if let Some(secret) = read_client_secret(&config.client_secrets_path).await {
                user.client_id.get_or_insert(secret.client_id);
                user.client_secret.get_or_insert(secret.client_secret);
                if user.token_uri.is_none() {
                    user.token_uri = secret.token_uri;
                }
            }
        }

        if let Some(granted) = &user.scopes {
            let missing: Vec<&String> = config
                .scopes
                .iter()
                .filter(|s| !granted.contains(s))
                .collect();
            if !missing.is_empty() {
                tracing::warn!(
                    missing = ?missing,
                    "stored token does not carry every configured scope"
                );
            }
        }

        tracing::debug!(path = %path.display(), "loaded authorized user token");

        Ok(Self::from_user(path, user, http_client))
    }

    /// Build a provider from an in-memory token; renewals are written to `path`
    pub fn from_user(path: PathBuf, user: AuthorizedUser, http_client: reqwest::Client) -> Self {
        Self {
            path,
            http_client,
            state: Mutex::new(user),
        }
    }

    async fn renew(&self, user: &mut AuthorizedUser) -> Result<String> {
        let refresh_token = user
            .refresh_token
            .clone()
            .ok_or(AuthError::NoRefreshToken)?;
        let (client_id, client_secret) = match (&user.client_id, &user.client_secret) {
            (Some(id), Some(secret)) => (id.clone(), secret.clone()),
            _ => return Err(AuthError::MissingClientCredentials.into()),
        };
        let token_uri = user
            .token_uri
            .clone()
            .unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string());

        tracing::info!("refreshing access token");

        let response = self
            .http_client
            .post(&token_uri)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AuthError::RefreshFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::RefreshRejected {
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let renewed: RefreshResponse = response
            .json()
            .await
            .map_err(|e| AuthError::RefreshFailed(format!("unreadable token response: {}", e)))?;

        user.token = Some(renewed.access_token.clone());
        user.expiry = renewed
            .expires_in
            .map(|secs| Utc::now() + chrono::Duration::seconds(secs));
        if let Some(rotated) = renewed.refresh_token {
            user.refresh_token = Some(rotated);
        }

        // A stale file only costs an extra refresh next run
        if let Err(e) = persist(&self.path, user).await {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to save renewed token");
        }

        Ok(renewed.access_token)
    }
}

#[async_trait]
impl TokenProvider for FileTokenProvider {
    async fn access_token(&self) -> Result<String> {
        let mut user = self.state.lock().await;
        if user.is_valid_at(Utc::now()) {
            if let Some(token) = &user.token {
                return Ok(token.clone());
            }
        }
        self.renew(&mut user).await
    }

    async fn refresh(&self) -> Result<String> {
        let mut user = self.state.lock().await;
        self.renew(&mut user).await
    }
}

async fn read_client_secret(path: &Path) -> Option<ClientSecret> {
    let text = tokio::fs::read_to_string(path).await.ok()?;
    match serde_json::from_str::<ClientSecretsFile>(&text) {
        Ok(file) => file.installed.or(file.web),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable client secrets file");
            None
        }
    }
}

/// Write `user` to a sibling temp file, then rename it over `path`
async fn persist(path: &Path, user: &AuthorizedUser) -> Result<()> {
    let json = serde_json::to_string(user)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await.map_err(Error::from)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn auth_config(dir: &Path) -> AuthConfig {
        AuthConfig {
            client_secrets_path: dir.join("credentials.json"),
            token_path: dir.join("token.json"),
            scopes: vec!["https://www.googleapis.com/auth/gmail.readonly".into()],
        }
    }

    #[tokio::test]
    async fn static_token_is_returned_and_cannot_refresh() {
        let provider = StaticToken::new("abc");
        assert_eq!(provider.access_token().await.unwrap(), "abc");
        assert!(matches!(
            provider.refresh().await,
            Err(Error::Auth(AuthError::NoRefreshToken))
        ));
    }

    #[tokio::test]
    async fn missing_token_file_is_an_auth_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = FileTokenProvider::load(&auth_config(dir.path()), reqwest::Client::new()).await;
        assert!(matches!(
            result,
            Err(Error::Auth(AuthError::MissingToken { .. }))
        ));
    }

    #[tokio::test]
    async fn garbage_token_file_is_an_auth_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("token.json"), "not json").unwrap();
        let result = FileTokenProvider::load(&auth_config(dir.path()), reqwest::Client::new()).await;
        assert!(matches!(
            result,
            Err(Error::Auth(AuthError::InvalidToken { .. }))
        ));
    }

    #[tokio::test]
    async fn valid_token_is_used_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let expiry = (Utc::now() + chrono::Duration::hours(1)).to_rfc3339();
        std::fs::write(
            dir.path().join("token.json"),
            format!(r#"{{"token":"live","refresh_token":"r","expiry":"{expiry}"}}"#),
        )
        .unwrap();

        let provider = FileTokenProvider::load(&auth_config(dir.path()), reqwest::Client::new())
            .await
            .unwrap();
        assert_eq!(provider.access_token().await.unwrap(), "live");
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_and_persisted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=r1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "fresh",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let token = serde_json::json!({
            "token": "stale",
            "refresh_token": "r1",
            "token_uri": format!("{}/token", server.uri()),
            "client_id": "cid",
            "client_secret": "secret",
            "expiry": "2020-01-01T00:00:00Z",
            "universe_domain": "googleapis.com"
        });
        std::fs::write(dir.path().join("token.json"), token.to_string()).unwrap();

        let provider = FileTokenProvider::load(&auth_config(dir.path()), reqwest::Client::new())
            .await
            .unwrap();
        assert_eq!(provider.access_token().await.unwrap(), "fresh");
        // Second call reuses the renewed token
        assert_eq!(provider.access_token().await.unwrap(), "fresh");

        let saved: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("token.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(saved["token"], "fresh");
        assert_eq!(saved["refresh_token"], "r1");
        assert_eq!(saved["universe_domain"], "googleapis.com");
        assert!(
            !dir.path().join("token.json.tmp").exists(),
            "temp file is renamed over the token"
        );
    }

    #[tokio::test]
    async fn client_credentials_fall_back_to_secrets_file() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("client_id=from-secrets"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "fresh",
                "expires_in": 3599
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("credentials.json"),
            serde_json::json!({
                "installed": {
                    "client_id": "from-secrets",
                    "client_secret": "s",
                    "token_uri": format!("{}/token", server.uri())
                }
            })
            .to_string(),
        )
        .unwrap();
        std::fs::write(dir.path().join("token.json"), r#"{"refresh_token":"r1"}"#).unwrap();

        let provider = FileTokenProvider::load(&auth_config(dir.path()), reqwest::Client::new())
            .await
            .unwrap();
        assert_eq!(provider.access_token().await.unwrap(), "fresh");
    }

    #[tokio::test]
    async fn rejected_refresh_surfaces_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string(r#"{"error":"invalid_grant"}"#))
            .mount(&server)
            .await;

        let user = AuthorizedUser {
            refresh_token: Some("revoked".into()),
            client_id: Some("cid".into()),
            client_secret: Some("secret".into()),
            token_uri: Some(format!("{}/token", server.uri())),
            ..Default::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let provider =
            FileTokenProvider::from_user(dir.path().join("token.json"), user, reqwest::Client::new());

        match provider.refresh().await {
            Err(Error::Auth(AuthError::RefreshRejected { status, body })) => {
                assert_eq!(status, 400);
                assert!(body.contains("invalid_grant"));
            }
            other => panic!("expected RefreshRejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn expired_token_without_refresh_token_fails() {
        let user = AuthorizedUser {
            token: Some("old".into()),
            expiry: Some(Utc::now() - chrono::Duration::hours(1)),
            ..Default::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let provider =
            FileTokenProvider::from_user(dir.path().join("token.json"), user, reqwest::Client::new());

        assert!(matches!(
            provider.access_token().await,
            Err(Error::Auth(AuthError::NoRefreshToken))
        ));
    }

    #[test]
    fn token_inside_skew_window_counts_as_stale() {
        let now = Utc::now();
        let user = AuthorizedUser {
            token: Some("t".into()),
            expiry: Some(now + chrono::Duration::seconds(30)),
            ..Default::default()
        };
        assert!(!user.is_valid_at(now));

        let user = AuthorizedUser {
            expiry: Some(now + chrono::Duration::minutes(10)),
            ..user
        };
        assert!(user.is_valid_at(now));
    }
}
