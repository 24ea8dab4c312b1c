// thermosync-api: Async transport and token lifecycle for cloud HVAC controller APIs

pub mod auth;
pub mod client;
pub mod error;
pub mod retry;
pub mod token;
pub mod transport;

pub use auth::{AuthBackend, AuthEndpoints, Credentials, HttpAuthBackend, TokenGrant};
pub use client::ApiClient;
pub use error::Error;
pub use retry::{Exhausted, RetryPolicy};
pub use token::{EXPIRY_BUFFER, TokenManager, TokenState};
pub use transport::{Request, RequestSigner, TlsMode, Transport, TransportConfig};
