// ── Token lifecycle ──
//
// Owns the bearer token and decides when to refresh it. Refresh tries
// the refresh-token grant first and falls back to a password login; the
// whole cycle runs under the retry policy. State only changes on a
// successful exchange, so a failed refresh never disturbs requests that
// are still using the previous token.

use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::auth::{AuthBackend, Credentials, TokenGrant};
use crate::error::Error;
use crate::retry::{Exhausted, RetryPolicy};
use crate::transport::RequestSigner;

/// Safety margin subtracted from `expires_in` when checking expiry.
pub const EXPIRY_BUFFER: Duration = Duration::from_secs(300);

/// In-memory bearer token state.
///
/// `access_token` is either empty (unauthenticated) or valid until
/// `acquired_at + expires_in`.
#[derive(Clone, Default)]
pub struct TokenState {
    pub access_token: String,
    pub token_type: String,
    pub refresh_token: Option<String>,
    pub expires_in: Duration,
    pub acquired_at: Option<Instant>,
}

impl TokenState {
    pub fn is_authenticated(&self) -> bool {
        !self.access_token.is_empty()
    }

    /// Whether the token is missing or expires within `buffer` of `now`.
    pub fn needs_refresh(&self, now: Instant, buffer: Duration) -> bool {
        let Some(acquired_at) = self.acquired_at else {
            return true;
        };
        if !self.is_authenticated() {
            return true;
        }
        let age = now.saturating_duration_since(acquired_at);
        age >= self.expires_in.saturating_sub(buffer)
    }

    /// Drop the access token. The refresh token is kept for the next cycle.
    fn invalidate(&mut self) {
        self.access_token.clear();
        self.acquired_at = None;
    }

    fn adopt(&mut self, grant: TokenGrant, now: Instant) {
        self.access_token = grant.access_token;
        self.token_type = grant.token_type;
        self.expires_in = grant.expires_in;
        self.acquired_at = Some(now);
        // Rotation is opportunistic: keep the old refresh token unless a new one arrived.
        if let Some(refresh_token) = grant.refresh_token {
            self.refresh_token = Some(refresh_token);
        }
    }
}

impl fmt::Debug for TokenState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenState")
            .field("authenticated", &self.is_authenticated())
            .field("token_type", &self.token_type)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_in", &self.expires_in)
            .field("acquired_at", &self.acquired_at)
            .finish()
    }
}

/// Keeps a non-expired bearer token available for outgoing requests.
///
/// Shared by every cache and reconciler that talks to the same account.
pub struct TokenManager {
    credentials: Credentials,
    backend: Arc<dyn AuthBackend>,
    state: RwLock<TokenState>,
    /// Serializes refresh cycles so concurrent callers share one exchange.
    refresh_lock: tokio::sync::Mutex<()>,
    retry: RetryPolicy,
    expiry_buffer: Duration,
}

impl TokenManager {
    pub fn new(credentials: Credentials, backend: Arc<dyn AuthBackend>) -> Self {
        Self {
            credentials,
            backend,
            state: RwLock::new(TokenState::default()),
            refresh_lock: tokio::sync::Mutex::new(()),
            retry: RetryPolicy::default(),
            expiry_buffer: EXPIRY_BUFFER,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_expiry_buffer(mut self, buffer: Duration) -> Self {
        self.expiry_buffer = buffer;
        self
    }

    /// A copy of the current token state.
    pub fn state(&self) -> TokenState {
        self.state.read().expect("token lock poisoned").clone()
    }

    fn needs_refresh(&self) -> bool {
        self.state
            .read()
            .expect("token lock poisoned")
            .needs_refresh(Instant::now(), self.expiry_buffer)
    }

    /// Force the next [`ensure_valid`](Self::ensure_valid) to run a refresh cycle.
    ///
    /// Call when the API rejects the current bearer token before its
    /// recorded expiry.
    pub fn invalidate(&self) {
        let mut state = self.state.write().expect("token lock poisoned");
        if state.is_authenticated() {
            warn!("access token rejected, discarding it");
        }
        state.invalidate();
    }

    /// Guarantee a token that will not expire within the expiry buffer.
    ///
    /// Suspends while a refresh cycle runs. Fails with
    /// [`Error::TokenRefreshExhausted`] once the retry policy gives up.
    pub async fn ensure_valid(&self) -> Result<(), Error> {
        if !self.needs_refresh() {
            return Ok(());
        }

        let _guard = self.refresh_lock.lock().await;
        // Another caller may have refreshed while we waited for the lock.
        if !self.needs_refresh() {
            debug!("token refreshed by a concurrent caller");
            return Ok(());
        }

        info!("refreshing access token");
        match self.retry.run("token refresh", || self.refresh_once()).await {
            Ok(()) => {
                let expires_in = self.state().expires_in.as_secs();
                info!(expires_in_secs = expires_in, "access token acquired");
                Ok(())
            }
            Err(Exhausted { attempts, last }) => {
                error!(attempts, error = %last, "token refresh failed on every path");
                Err(Error::TokenRefreshExhausted {
                    attempts,
                    source: Box::new(last),
                })
            }
        }
    }

    /// One refresh cycle: refresh-token grant, then password login.
    async fn refresh_once(&self) -> Result<(), Error> {
        let refresh_token = self.state().refresh_token;

        if let Some(refresh_token) = refresh_token {
            match self.backend.refresh(&refresh_token).await {
                Ok(grant) => {
                    debug!("refresh-token grant succeeded");
                    self.adopt(grant);
                    return Ok(());
                }
                Err(e) => {
                    warn!(error = %e, "refresh-token grant failed, falling back to password login");
                }
            }
        }

        let grant = self.backend.login(&self.credentials).await?;
        debug!("password login succeeded");
        self.adopt(grant);
        Ok(())
    }

    fn adopt(&self, grant: TokenGrant) {
        self.state
            .write()
            .expect("token lock poisoned")
            .adopt(grant, Instant::now());
    }
}

impl RequestSigner for TokenManager {
    fn sign(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let state = self.state.read().expect("token lock poisoned");
        if state.is_authenticated() {
            builder.header(
                reqwest::header::AUTHORIZATION,
                format!("{} {}", state.token_type, state.access_token),
            )
        } else {
            builder
        }
    }
}
