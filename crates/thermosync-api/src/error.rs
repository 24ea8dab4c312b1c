use thiserror::Error;

/// Top-level error type for the `thermosync-api` crate.
///
/// Covers authentication, token refresh, transport, and envelope failures.
/// `thermosync-core` maps these into its own taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Login or token exchange rejected, or the API refused the bearer token.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// Every refresh path failed for every attempt of the retry policy.
    #[error("Token refresh failed after {attempts} attempts: {source}")]
    TokenRefreshExhausted {
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Non-success HTTP status outside of authentication.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    // ── API ─────────────────────────────────────────────────────────
    /// Error entries reported inside the `{data, errors}` envelope.
    #[error("Remote API error: {message}")]
    Remote { message: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this error came from the authentication layer.
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            Self::Authentication { .. } | Self::TokenRefreshExhausted { .. }
        )
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// HTTP status attached to this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Truncate a response body for inclusion in error messages.
pub(crate) fn preview(body: &str) -> String {
    body.chars().take(200).collect()
}
