//! Scripted stand-in for the portal used by unit tests.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{HeaderMap, HeaderValue, LOCATION, SET_COOKIE};
use url::Url;

use crate::transport::{PortalHttpClient, PortalHttpResponse, PortalRequest, TransportError};

/// Answers requests with pre-recorded responses, in order, and keeps every
/// request it saw.
pub struct StubPortal {
    responses: Mutex<Vec<PortalHttpResponse>>,
    seen: Mutex<Vec<PortalRequest>>,
    delay: Option<Duration>,
}

impl StubPortal {
    pub fn new(responses: Vec<PortalHttpResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().rev().collect()),
            seen: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Hold every response back for `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<PortalRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl PortalHttpClient for StubPortal {
    async fn send(&self, request: &PortalRequest) -> Result<PortalHttpResponse, TransportError> {
        self.seen.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let mut response = self
            .responses
            .lock()
            .unwrap()
            .pop()
            .ok_or_else(|| TransportError::Transport("no more stub responses".into()))?;
        response.url = request.url.clone();
        Ok(response)
    }
}

pub fn html(status: u16, body: &str, cookies: &[&str]) -> PortalHttpResponse {
    let mut headers = HeaderMap::new();
    for cookie in cookies {
        headers.append(SET_COOKIE, HeaderValue::from_str(cookie).unwrap());
    }
    PortalHttpResponse {
        status,
        headers,
        body: Bytes::from(body.to_string()),
        url: Url::parse("https://portal.test/").unwrap(),
    }
}

/// Login page carrying `csrf`, with derived meta and script tokens.
pub fn login_page(csrf: &str, sessid: Option<&str>) -> PortalHttpResponse {
    let body = format!(
        r#"<html><head><meta name="csrf" content="meta-{csrf}">
<script>window.cfg = {{"CSRF_TOKEN":"script-{csrf}"}};</script></head>
<body><form id="login-form" action="/login" method="post">
<input type="hidden" name="csrf" value="{csrf}">
<input type="hidden" name="selector" value="login">
</form></body></html>"#
    );
    let cookie = sessid.map(|value| format!("SESSID={value}; path=/; HttpOnly"));
    let cookies: Vec<&str> = cookie.iter().map(String::as_str).collect();
    html(200, &body, &cookies)
}

pub fn redirect(location: &str, sessid: Option<&str>) -> PortalHttpResponse {
    let mut response = status(302);
    response
        .headers
        .insert(LOCATION, HeaderValue::from_str(location).unwrap());
    if let Some(value) = sessid {
        response.headers.append(
            SET_COOKIE,
            HeaderValue::from_str(&format!("SESSID={value}; path=/")).unwrap(),
        );
    }
    response
}

pub fn status(code: u16) -> PortalHttpResponse {
    html(code, "", &[])
}

pub fn json(body: &str) -> PortalHttpResponse {
    html(200, body, &[])
}
