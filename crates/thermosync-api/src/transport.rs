// Shared transport configuration and the request/response seam.
//
// The API client and the auth backend build their `reqwest::Client`
// from the same `TransportConfig`. Everything above this layer talks to
// the remote through the object-safe `Transport` trait, so the sync
// engine never sees HTTP directly.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::Error;

/// TLS verification mode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsMode {
    /// Use the system certificate store.
    #[default]
    System,
    /// Use a custom CA certificate from the given PEM file.
    CustomCa(PathBuf),
    /// Accept any certificate (debugging proxies only).
    DangerAcceptInvalid,
}

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tls: TlsMode,
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::System,
            timeout: Duration::from_secs(30),
            user_agent: concat!("thermosync/", env!("CARGO_PKG_VERSION")).to_owned(),
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(self.user_agent.as_str());

        match &self.tls {
            TlsMode::System => {}
            TlsMode::CustomCa(path) => {
                let cert_pem = std::fs::read(path)
                    .map_err(|e| Error::Tls(format!("failed to read CA cert: {e}")))?;
                let cert = reqwest::Certificate::from_pem(&cert_pem)
                    .map_err(|e| Error::Tls(format!("invalid CA cert: {e}")))?;
                builder = builder.add_root_certificate(cert);
            }
            TlsMode::DangerAcceptInvalid => {
                builder = builder.danger_accept_invalid_certs(true);
            }
        }

        builder
            .build()
            .map_err(|e| Error::Tls(format!("failed to build HTTP client: {e}")))
    }
}

/// An opaque operation against the remote API.
///
/// The sync engine never inspects `query`; it is whatever the resource
/// dialect needs to send. Serialized as the standard
/// `{operationName, query, variables}` body.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub operation_name: String,
    pub query: String,
    pub variables: Value,
}

impl Request {
    pub fn new(
        operation_name: impl Into<String>,
        query: impl Into<String>,
        variables: Value,
    ) -> Self {
        Self {
            operation_name: operation_name.into(),
            query: query.into(),
            variables,
        }
    }
}

/// One authenticated request/response exchange with the remote.
///
/// Implementations return the unwrapped `data` payload on success and a
/// distinguishable [`Error`] on any network, HTTP, or envelope failure.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &Request) -> Result<Value, Error>;
}

/// Hook invoked on every outgoing request to attach credentials.
///
/// Signing never performs network I/O; callers are expected to have
/// refreshed credentials beforehand.
pub trait RequestSigner: Send + Sync {
    fn sign(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder;
}
