//! Transport seam used by the login flow and the client.
//!
//! Everything that touches the network goes through [`PortalHttpClient`], so
//! the session logic can be driven by a stub in tests and by
//! [`ReqwestPortalHttpClient`] in production.

pub mod reqwest_client;
pub mod tls;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{HeaderMap, LOCATION, SET_COOKIE};
use http::{Method, StatusCode};
use thiserror::Error;
use url::Url;

pub use reqwest_client::ReqwestPortalHttpClient;
pub use tls::TlsTrustPolicy;

/// Contract for the HTTP transport.
///
/// Implementations must not follow redirects: the login step relies on seeing
/// the raw 302 answer. Cookies are carried explicitly in the request headers,
/// so implementations should not keep a cookie jar of their own.
#[async_trait]
pub trait PortalHttpClient: Send + Sync {
    async fn send(&self, request: &PortalRequest) -> Result<PortalHttpResponse, TransportError>;
}

/// Fully formed outbound request.
#[derive(Debug, Clone)]
pub struct PortalRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl PortalRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: Option<Bytes>) -> Self {
        self.body = body;
        self
    }

    /// Header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

/// Minimal response representation returned by the transport.
#[derive(Debug, Clone)]
pub struct PortalHttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub url: Url,
}

impl PortalHttpResponse {
    pub fn location(&self) -> Option<&str> {
        self.headers
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }

    /// Canonical reason phrase for the status code, or an empty string.
    pub fn reason(&self) -> &'static str {
        StatusCode::from_u16(self.status)
            .ok()
            .and_then(|status| status.canonical_reason())
            .unwrap_or("")
    }

    /// Lossy UTF-8 view of the body.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Raw `Set-Cookie` header values, in the order received.
    pub fn set_cookies(&self) -> impl Iterator<Item = &str> {
        self.headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to {0} timed out")]
    Timeout(String),
    #[error("http transport error: {0}")]
    Transport(String),
    #[error("tls configuration error: {0}")]
    Tls(String),
}
