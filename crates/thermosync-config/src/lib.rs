//! Shared configuration for thermosync.
//!
//! TOML profiles, credential resolution (env + keyring + plaintext),
//! and translation into the api and core settings the binary needs.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

use thermosync_api::{AuthEndpoints, Credentials, TlsMode, TransportConfig};
use thermosync_core::SyncConfig;

/// Keyring service name; entries are `<profile>/password`.
pub const KEYRING_SERVICE: &str = "thermosync";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{profile}' not found in config")]
    UnknownProfile { profile: String },

    #[error("no credentials configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named system profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Look up a profile, falling back to `default_profile`.
    pub fn profile(&self, name: Option<&str>) -> Result<(&str, &Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .unwrap_or("default");
        self.profiles
            .get_key_value(name)
            .map(|(k, v)| (k.as_str(), v))
            .ok_or_else(|| ConfigError::UnknownProfile {
                profile: name.into(),
            })
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default)]
    pub insecure: bool,

    #[serde(default = "default_timeout")]
    pub timeout: u64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            insecure: false,
            timeout: default_timeout(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_timeout() -> u64 {
    30
}
fn default_poll_interval() -> u64 {
    30
}

/// A named HVAC system profile.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Profile {
    /// Query endpoint (e.g., "https://api.example.com/graphql").
    pub api_url: String,

    /// Token endpoint for the password grant.
    pub token_url: String,

    /// Token endpoint for the refresh grant. Defaults to `token_url`.
    pub refresh_url: Option<String>,

    /// OAuth client id sent with both grants.
    pub client_id: String,

    /// System serial number.
    pub serial: String,

    /// Account username.
    pub username: Option<String>,

    /// Plaintext password. Prefer the keyring or an env var.
    pub password: Option<String>,

    /// Environment variable name containing the password.
    pub password_env: Option<String>,

    /// Path to custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Override insecure TLS setting.
    pub insecure: Option<bool>,

    /// Override request timeout (seconds).
    pub timeout: Option<u64>,

    /// Override poll interval (seconds).
    pub poll_interval_secs: Option<u64>,

    /// Override the push debounce (milliseconds).
    pub debounce_ms: Option<u64>,

    /// Override the post-write settle wait (milliseconds).
    pub settle_ms: Option<u64>,

    /// Extra keys to ignore during change detection.
    #[serde(default)]
    pub volatile_fields: Vec<String>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("dev", "thermosync", "thermosync").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("thermosync");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from file + environment.
///
/// Env keys nest with a double underscore:
/// `THERMOSYNC_PROFILES__HOME__SERIAL=...`.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

pub fn load_config_from(path: &std::path::Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("THERMOSYNC_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Credential resolution ───────────────────────────────────────────

fn keyring_password(profile_name: &str) -> Option<String> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/password")).ok()?;
    entry.get_password().ok()
}

/// Store a password in the system keyring for `profile_name`.
pub fn store_password(profile_name: &str, password: &str) -> Result<(), ConfigError> {
    keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/password"))
        .and_then(|entry| entry.set_password(password))
        .map_err(|e| ConfigError::Validation {
            field: "keyring".into(),
            reason: e.to_string(),
        })
}

/// Resolve account credentials from the profile.
pub fn resolve_credentials(
    profile: &Profile,
    profile_name: &str,
) -> Result<Credentials, ConfigError> {
    resolve_credentials_with(profile, profile_name, keyring_password)
}

fn resolve_credentials_with(
    profile: &Profile,
    profile_name: &str,
    keyring: impl Fn(&str) -> Option<String>,
) -> Result<Credentials, ConfigError> {
    let no_credentials = || ConfigError::NoCredentials {
        profile: profile_name.into(),
    };

    let username = profile
        .username
        .clone()
        .or_else(|| std::env::var("THERMOSYNC_USERNAME").ok())
        .ok_or_else(no_credentials)?;

    // 1. Env var named by the profile, then the global one
    let env_names = profile
        .password_env
        .iter()
        .map(String::as_str)
        .chain(std::iter::once("THERMOSYNC_PASSWORD"));
    for name in env_names {
        if let Ok(pw) = std::env::var(name) {
            debug!(profile = profile_name, env = name, "password from environment");
            return Ok(Credentials::new(username, SecretString::from(pw)));
        }
    }

    // 2. Keyring
    if let Some(pw) = keyring(profile_name) {
        debug!(profile = profile_name, "password from keyring");
        return Ok(Credentials::new(username, SecretString::from(pw)));
    }

    // 3. Plaintext in config
    if let Some(ref pw) = profile.password {
        debug!(profile = profile_name, "password from config file");
        return Ok(Credentials::new(username, SecretString::from(pw.clone())));
    }

    Err(no_credentials())
}

// ── Translation ─────────────────────────────────────────────────────

/// Everything needed to build a synchronized system from one profile.
#[derive(Debug)]
pub struct Settings {
    pub profile_name: String,
    pub api_url: Url,
    pub auth: AuthEndpoints,
    pub credentials: Credentials,
    pub serial: String,
    pub transport: TransportConfig,
    pub sync: SyncConfig,
}

fn parse_url(field: &str, raw: &str) -> Result<Url, ConfigError> {
    raw.parse().map_err(|e| ConfigError::Validation {
        field: field.into(),
        reason: format!("invalid URL '{raw}': {e}"),
    })
}

/// Build [`Settings`] from a profile and the global defaults.
pub fn profile_to_settings(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<Settings, ConfigError> {
    let credentials = resolve_credentials(profile, profile_name)?;
    translate(profile, profile_name, defaults, credentials)
}

fn translate(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
    credentials: Credentials,
) -> Result<Settings, ConfigError> {
    let api_url = parse_url("api_url", &profile.api_url)?;
    let login_url = parse_url("token_url", &profile.token_url)?;
    let refresh_url = match profile.refresh_url.as_deref() {
        Some(raw) => parse_url("refresh_url", raw)?,
        None => login_url.clone(),
    };

    if profile.serial.trim().is_empty() {
        return Err(ConfigError::Validation {
            field: "serial".into(),
            reason: "must not be empty".into(),
        });
    }

    let tls = if profile.insecure.unwrap_or(defaults.insecure) {
        TlsMode::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsMode::CustomCa(ca_path.clone())
    } else {
        TlsMode::System
    };

    let transport = TransportConfig {
        tls,
        timeout: Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout)),
        ..TransportConfig::default()
    };

    let mut sync = SyncConfig {
        poll_interval: Duration::from_secs(
            profile
                .poll_interval_secs
                .unwrap_or(defaults.poll_interval_secs),
        ),
        ..SyncConfig::default()
    };
    if let Some(ms) = profile.debounce_ms {
        sync.debounce = Duration::from_millis(ms);
    }
    if let Some(ms) = profile.settle_ms {
        sync.settle = Duration::from_millis(ms);
    }
    for field in &profile.volatile_fields {
        if !sync.volatile_fields.contains(field) {
            sync.volatile_fields.push(field.clone());
        }
    }

    Ok(Settings {
        profile_name: profile_name.into(),
        api_url,
        auth: AuthEndpoints {
            login_url,
            refresh_url,
            client_id: profile.client_id.clone(),
        },
        credentials,
        serial: profile.serial.clone(),
        transport,
        sync,
    })
}
