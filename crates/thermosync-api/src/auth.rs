// Token endpoint authentication
//
// Primary login (password grant) and secondary refresh (refresh-token
// grant) against OAuth-style token endpoints. Both return a
// `TokenGrant`; deciding *when* to call them is the token manager's job.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::{Error, preview};
use crate::transport::TransportConfig;

/// Lifetime assumed when a token response omits `expires_in`.
const DEFAULT_EXPIRES_IN: Duration = Duration::from_secs(3600);

/// Account credentials for the primary login path.
///
/// Immutable for the process lifetime; the password stays wrapped in a
/// [`SecretString`] so it never shows up in `Debug` output.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: SecretString) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }
}

/// A successful token exchange.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub token_type: String,
    /// `None` when the endpoint did not rotate the refresh token.
    pub refresh_token: Option<String>,
    pub expires_in: Duration,
}

impl fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Wire shape of a token endpoint response.
#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    token_type: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
}

impl TokenResponse {
    fn into_grant(self) -> Result<TokenGrant, Error> {
        let access_token = self
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Authentication {
                message: "token response is missing an access token".into(),
            })?;

        Ok(TokenGrant {
            access_token,
            token_type: self.token_type.unwrap_or_else(|| "Bearer".into()),
            refresh_token: self.refresh_token.filter(|t| !t.is_empty()),
            expires_in: self
                .expires_in
                .map_or(DEFAULT_EXPIRES_IN, Duration::from_secs),
        })
    }
}

/// The two token exchanges the token manager can perform.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Primary path: exchange username/password for a token pair.
    async fn login(&self, credentials: &Credentials) -> Result<TokenGrant, Error>;

    /// Secondary path: exchange a held refresh token for a new access token.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, Error>;
}

/// Token endpoint locations.
#[derive(Debug, Clone)]
pub struct AuthEndpoints {
    pub login_url: Url,
    pub refresh_url: Url,
    pub client_id: String,
}

/// [`AuthBackend`] that talks to OAuth-style token endpoints over HTTP.
pub struct HttpAuthBackend {
    http: reqwest::Client,
    endpoints: AuthEndpoints,
}

impl HttpAuthBackend {
    pub fn new(endpoints: AuthEndpoints, transport: &TransportConfig) -> Result<Self, Error> {
        Ok(Self {
            http: transport.build_client()?,
            endpoints,
        })
    }

    /// Create a backend with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, endpoints: AuthEndpoints) -> Self {
        Self { http, endpoints }
    }

    async fn exchange(&self, url: &Url, form: &[(&str, &str)]) -> Result<TokenGrant, Error> {
        let resp = self
            .http
            .post(url.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .form(form)
            .send()
            .await
            .map_err(Error::Transport)?;

        let status = resp.status();
        if status == reqwest::StatusCode::BAD_REQUEST || status == reqwest::StatusCode::UNAUTHORIZED
        {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Authentication {
                message: format!(
                    "token endpoint rejected request (HTTP {status}): {}",
                    preview(&body)
                ),
            });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Http {
                status: status.as_u16(),
                body: preview(&body),
            });
        }

        let body = resp.text().await.map_err(Error::Transport)?;
        let parsed: TokenResponse =
            serde_json::from_str(&body).map_err(|e| Error::Deserialization {
                message: format!("invalid token response: {e}"),
                body: preview(&body),
            })?;
        parsed.into_grant()
    }
}

#[async_trait]
impl AuthBackend for HttpAuthBackend {
    async fn login(&self, credentials: &Credentials) -> Result<TokenGrant, Error> {
        debug!(url = %self.endpoints.login_url, "password grant");
        self.exchange(
            &self.endpoints.login_url,
            &[
                ("grant_type", "password"),
                ("username", credentials.username.as_str()),
                ("password", credentials.password.expose_secret()),
                ("client_id", self.endpoints.client_id.as_str()),
                ("scope", "offline_access"),
            ],
        )
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, Error> {
        debug!(url = %self.endpoints.refresh_url, "refresh-token grant");
        self.exchange(
            &self.endpoints.refresh_url,
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.endpoints.client_id.as_str()),
            ],
        )
        .await
    }
}
