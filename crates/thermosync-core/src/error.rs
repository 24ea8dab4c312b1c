// ── Core error types ──
//
// User-facing errors from thermosync-core. Consumers never see HTTP
// status codes or JSON parse failures directly. The
// `From<thermosync_api::Error>` impl translates transport-layer errors
// into domain-appropriate variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot reach the controller API: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Request to the controller API timed out")]
    Timeout,

    // ── Data errors ──────────────────────────────────────────────────
    #[error("No snapshot available yet: no fetch has succeeded")]
    DataNotAvailable,

    #[error("Write target not found: {target}")]
    TargetNotFound { target: String },

    #[error("Malformed remote payload: {message}")]
    Malformed { message: String },

    // ── Coordination errors ──────────────────────────────────────────
    #[error("Exclusive gate anomaly: {message}")]
    LockContention { message: String },

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("API error: {message}")]
    Api {
        message: String,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether the token lifecycle gave up on this error.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::AuthenticationFailed { .. })
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<thermosync_api::Error> for CoreError {
    fn from(err: thermosync_api::Error) -> Self {
        match err {
            thermosync_api::Error::Authentication { message } => {
                CoreError::AuthenticationFailed { message }
            }
            thermosync_api::Error::TokenRefreshExhausted { attempts, source } => {
                CoreError::AuthenticationFailed {
                    message: format!("token refresh gave up after {attempts} attempts: {source}"),
                }
            }
            thermosync_api::Error::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout
                } else if e.is_connect() {
                    CoreError::ConnectionFailed {
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Api {
                        message: e.to_string(),
                        status: e.status().map(|s| s.as_u16()),
                    }
                }
            }
            thermosync_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            thermosync_api::Error::Tls(msg) => CoreError::ConnectionFailed {
                reason: format!("TLS error: {msg}"),
            },
            thermosync_api::Error::Http { status, body } => CoreError::Api {
                message: body,
                status: Some(status),
            },
            thermosync_api::Error::Remote { message } => CoreError::Api {
                message,
                status: None,
            },
            thermosync_api::Error::Deserialization { message, body: _ } => {
                CoreError::Malformed { message }
            }
        }
    }
}
