//! CLI error types with miette diagnostics.
//!
//! Maps core and config errors into user-facing errors with actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use thermosync_config::ConfigError;
use thermosync_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const MISMATCH: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach the controller API: {reason}")]
    #[diagnostic(
        code(thermosync::connection_failed),
        help("Check network access and the api_url in your profile.")
    )]
    ConnectionFailed { reason: String },

    #[error("Request timed out")]
    #[diagnostic(
        code(thermosync::timeout),
        help("Raise `timeout` in your profile if the API is slow.")
    )]
    Timeout,

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(thermosync::auth_failed),
        help(
            "Verify the username and password for this profile.\n\
             Run: thermosync config set-password"
        )
    )]
    AuthFailed { message: String },

    #[error("No credentials configured for profile '{profile}'")]
    #[diagnostic(
        code(thermosync::no_credentials),
        help(
            "Set `username` in the profile, then store a password with\n\
             `thermosync config set-password` or set THERMOSYNC_PASSWORD."
        )
    )]
    NoCredentials { profile: String },

    #[error("Profile '{profile}' not found in {path}")]
    #[diagnostic(
        code(thermosync::no_profile),
        help("Add a [profiles.{profile}] table to the config file.")
    )]
    NoProfile { profile: String, path: String },

    // ── Resources ────────────────────────────────────────────────────
    #[error("{target} not found")]
    #[diagnostic(
        code(thermosync::not_found),
        help("Run: thermosync status to see available zones")
    )]
    NotFound { target: String },

    // ── Writes ───────────────────────────────────────────────────────
    #[error("The remote did not take the change: {details}")]
    #[diagnostic(
        code(thermosync::mismatch),
        help("The controller may reject or clamp this value. Check `thermosync status`.")
    )]
    Mismatch { details: String },

    #[error("Write failed: {message}")]
    #[diagnostic(code(thermosync::write_failed))]
    WriteFailed { message: String },

    #[error("Interrupted before the remote confirmed the change")]
    #[diagnostic(code(thermosync::interrupted))]
    Interrupted,

    // ── Other ────────────────────────────────────────────────────────
    #[error("API error: {message}")]
    #[diagnostic(code(thermosync::api_error))]
    Api { message: String },

    #[error("Invalid {field}: {reason}")]
    #[diagnostic(code(thermosync::validation))]
    Validation { field: String, reason: String },

    #[error(transparent)]
    #[diagnostic(code(thermosync::config))]
    Config(ConfigError),

    #[error(transparent)]
    #[diagnostic(code(thermosync::io))]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Mismatch { .. } => exit_code::MISMATCH,
            Self::Timeout => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::NoProfile { .. } | Self::Config(_) => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { reason } => Self::ConnectionFailed { reason },
            CoreError::AuthenticationFailed { message } => Self::AuthFailed { message },
            CoreError::Timeout => Self::Timeout,
            CoreError::TargetNotFound { target } => Self::NotFound { target },
            CoreError::Config { message } => Self::Validation {
                field: "config".into(),
                reason: message,
            },
            other @ (CoreError::DataNotAvailable
            | CoreError::Malformed { .. }
            | CoreError::LockContention { .. }
            | CoreError::Api { .. }
            | CoreError::Internal(_)) => Self::Api {
                message: other.to_string(),
            },
        }
    }
}

impl From<thermosync_api::Error> for CliError {
    fn from(err: thermosync_api::Error) -> Self {
        CoreError::from(err).into()
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NoCredentials { profile } => Self::NoCredentials { profile },
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            ConfigError::UnknownProfile { profile } => Self::NoProfile {
                profile,
                path: thermosync_config::config_path().display().to_string(),
            },
            other => Self::Config(other),
        }
    }
}
