//! Reqwest-based implementation of the `PortalHttpClient` trait.
//!
//! Thin adapter around `reqwest::Client` that converts between the shared
//! request/response representations and the concrete transport.

use std::time::Duration;

use async_trait::async_trait;
use http::{
    HeaderMap as HttpHeaderMap, HeaderName as HttpHeaderName, HeaderValue as HttpHeaderValue,
};
use reqwest::{Client, Method, header::HeaderMap, redirect::Policy};

use super::{PortalHttpClient, PortalHttpResponse, PortalRequest, TlsTrustPolicy, TransportError};

/// Default per-request deadline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Reqwest-backed transport used against the live portal.
pub struct ReqwestPortalHttpClient {
    client: Client,
}

impl ReqwestPortalHttpClient {
    /// Creates a client with redirects disabled and no cookie jar, so the
    /// login flow sees the raw 302 and owns the session cookie.
    pub fn new(tls: &TlsTrustPolicy, timeout: Duration) -> Result<Self, TransportError> {
        let builder = Client::builder()
            .redirect(Policy::none())
            .timeout(timeout);

        let client = tls
            .apply(builder)?
            .build()
            .map_err(|err| TransportError::Transport(err.to_string()))?;

        Ok(Self { client })
    }

    /// Wrap an existing reqwest client. The client must have redirects
    /// disabled, otherwise the login step never observes the 302.
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PortalHttpClient for ReqwestPortalHttpClient {
    async fn send(&self, request: &PortalRequest) -> Result<PortalHttpResponse, TransportError> {
        let req_method = map_method(&request.method)?;
        let req_headers = convert_headers(&request.headers)?;

        let mut builder = self
            .client
            .request(req_method, request.url.as_str())
            .headers(req_headers);

        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|err| map_error(err, request))?;

        to_portal_response(response, request).await
    }
}

fn map_error(err: reqwest::Error, request: &PortalRequest) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(format!("{} {}", request.method, request.url))
    } else {
        TransportError::Transport(format!("{} {}: {err}", request.method, request.url))
    }
}

fn map_method(method: &http::Method) -> Result<Method, TransportError> {
    Method::from_bytes(method.as_str().as_bytes())
        .map_err(|err| TransportError::Transport(err.to_string()))
}

fn convert_headers(headers: &HttpHeaderMap) -> Result<HeaderMap, TransportError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers.iter() {
        let name = reqwest::header::HeaderName::from_bytes(name.as_str().as_bytes())
            .map_err(|err| TransportError::Transport(err.to_string()))?;
        let value = reqwest::header::HeaderValue::from_bytes(value.as_bytes())
            .map_err(|err| TransportError::Transport(err.to_string()))?;
        map.append(name, value);
    }
    Ok(map)
}

async fn to_portal_response(
    response: reqwest::Response,
    request: &PortalRequest,
) -> Result<PortalHttpResponse, TransportError> {
    let status = response.status().as_u16();
    let headers = convert_back_headers(response.headers())?;
    let url = response.url().clone();
    let body = response
        .bytes()
        .await
        .map_err(|err| map_error(err, request))?;

    Ok(PortalHttpResponse {
        status,
        headers,
        body,
        url,
    })
}

fn convert_back_headers(map: &HeaderMap) -> Result<HttpHeaderMap, TransportError> {
    let mut headers = HttpHeaderMap::new();
    for (name, value) in map.iter() {
        let http_name = HttpHeaderName::from_bytes(name.as_str().as_bytes())
            .map_err(|err| TransportError::Transport(err.to_string()))?;
        let http_value = HttpHeaderValue::from_bytes(value.as_bytes())
            .map_err(|err| TransportError::Transport(err.to_string()))?;
        // append keeps every Set-Cookie line
        headers.append(http_name, http_value);
    }
    Ok(headers)
}
