// API HTTP client
//
// Wraps `reqwest::Client` with bearer signing and `{data, errors}`
// envelope unwrapping. The query language itself is opaque here: the
// client posts whatever `Request` it is handed and returns `data`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, trace};
use url::Url;

use crate::error::{Error, preview};
use crate::transport::{Request, RequestSigner, Transport, TransportConfig};

#[derive(Deserialize)]
struct Envelope {
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<RemoteError>,
}

#[derive(Deserialize)]
struct RemoteError {
    message: String,
    #[serde(default)]
    extensions: Option<RemoteErrorExtensions>,
}

#[derive(Deserialize)]
struct RemoteErrorExtensions {
    code: Option<String>,
}

impl RemoteError {
    fn is_unauthenticated(&self) -> bool {
        self.extensions
            .as_ref()
            .and_then(|ext| ext.code.as_deref())
            .is_some_and(|code| code == "UNAUTHENTICATED")
    }
}

/// HTTP client for the controller's query endpoint.
///
/// Every request is signed through the optional [`RequestSigner`] right
/// before it is sent.
pub struct ApiClient {
    http: reqwest::Client,
    endpoint: Url,
    signer: Option<Arc<dyn RequestSigner>>,
}

impl ApiClient {
    /// Create a client from a `TransportConfig`.
    pub fn new(endpoint: Url, transport: &TransportConfig) -> Result<Self, Error> {
        Ok(Self {
            http: transport.build_client()?,
            endpoint,
            signer: None,
        })
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, endpoint: Url) -> Self {
        Self {
            http,
            endpoint,
            signer: None,
        }
    }

    /// Attach the signing hook that injects credentials into each request.
    pub fn with_signer(mut self, signer: Arc<dyn RequestSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// The query endpoint URL.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Parse the `{data, errors}` envelope, returning `data` on success.
    async fn parse_envelope(resp: reqwest::Response) -> Result<Value, Error> {
        let status = resp.status();

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::Authentication {
                message: "bearer token rejected (HTTP 401)".into(),
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
        trace!(bytes = body.len(), "response body received");

        let envelope: Envelope = serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: format!("{e} (body preview: {:?})", preview(&body)),
            body: body.clone(),
        })?;

        if !envelope.errors.is_empty() {
            if let Some(err) = envelope.errors.iter().find(|e| e.is_unauthenticated()) {
                return Err(Error::Authentication {
                    message: err.message.clone(),
                });
            }
            let message = envelope
                .errors
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(Error::Remote { message });
        }

        envelope.data.ok_or_else(|| Error::Deserialization {
            message: "response envelope has no data".into(),
            body,
        })
    }
}

#[async_trait]
impl Transport for ApiClient {
    async fn send(&self, request: &Request) -> Result<Value, Error> {
        debug!(operation = %request.operation_name, "POST {}", self.endpoint);

        let mut builder = self.http.post(self.endpoint.clone()).json(request);
        if let Some(signer) = &self.signer {
            builder = signer.sign(builder);
        }
        let resp = builder.send().await.map_err(Error::Transport)?;

        Self::parse_envelope(resp).await
    }
}
