//! Composition of outbound requests on top of a session.
//!
//! The portal only accepts requests that look like they come from its own
//! pages: consent cookie, session cookie, same-origin `Origin`, and on
//! state-changing calls the CSRF headers its scripts would send.

use bytes::Bytes;
use http::Method;
use http::header::{
    ACCEPT, CONTENT_TYPE, COOKIE, HeaderMap, HeaderName, HeaderValue, ORIGIN, USER_AGENT,
};
use url::Url;

use crate::transport::PortalRequest;

use super::login::LoginFlow;
use super::state::SessionState;
use super::{
    CONSENT_COOKIE_NAME, CONSENT_COOKIE_VALUE, META_CSRF_HEADER, REQUESTED_WITH_HEADER,
    SCRIPT_CSRF_HEADER, SESSION_COOKIE, SessionError, XML_HTTP_REQUEST,
};

/// Prefix of the JSON data API; everything else is the AJAX surface.
pub const DATA_API_PREFIX: &str = "/pfapi/";

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const JSON_CONTENT_TYPE: &str = "application/json";

/// Which part of the portal a request targets. Decides the extra headers a
/// state-changing request carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestSurface {
    /// Internal endpoints called by the portal's scripts.
    Ajax,
    /// Script call with a form-encoded body.
    AjaxForm,
    /// Plain browser form submission.
    Form,
    /// JSON API under `/pfapi/`.
    DataApi,
}

impl RequestSurface {
    pub fn for_endpoint(endpoint: &str) -> Self {
        if endpoint.starts_with(DATA_API_PREFIX) {
            RequestSurface::DataApi
        } else {
            RequestSurface::Ajax
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestBuilder {
    base_url: Url,
    user_agent: String,
}

impl RequestBuilder {
    pub fn new(base_url: Url, user_agent: impl Into<String>) -> Self {
        Self {
            base_url,
            user_agent: user_agent.into(),
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Log in if needed, then compose the request.
    ///
    /// The endpoint is validated before any login traffic is sent. Login
    /// errors are returned as they are.
    pub async fn build(
        &self,
        flow: &LoginFlow,
        session: &mut SessionState,
        method: Method,
        endpoint: &str,
        body: Option<Bytes>,
    ) -> Result<PortalRequest, SessionError> {
        self.endpoint_url(endpoint)?;

        if !session.is_authenticated() {
            flow.login(session).await?;
        }

        let surface = RequestSurface::for_endpoint(endpoint);
        self.compose(session, method, endpoint, body, surface)
    }

    /// `base_url + endpoint`. The endpoint must be an absolute path.
    pub fn endpoint_url(&self, endpoint: &str) -> Result<Url, SessionError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let raw = format!("{base}{endpoint}");

        if !endpoint.starts_with('/') {
            return Err(SessionError::InvalidUrl {
                url: raw,
                reason: "endpoint must start with '/'".into(),
            });
        }
        if endpoint.chars().any(char::is_control) {
            return Err(SessionError::InvalidUrl {
                url: raw,
                reason: "endpoint contains control characters".into(),
            });
        }

        let url = Url::parse(&raw).map_err(|err| SessionError::InvalidUrl {
            reason: err.to_string(),
            url: raw.clone(),
        })?;
        if url.origin() != self.base_url.origin() {
            return Err(SessionError::InvalidUrl {
                url: raw,
                reason: "endpoint leaves the portal origin".into(),
            });
        }
        Ok(url)
    }

    /// Compose a request from the current session without any I/O.
    pub fn compose(
        &self,
        session: &SessionState,
        method: Method,
        endpoint: &str,
        body: Option<Bytes>,
        surface: RequestSurface,
    ) -> Result<PortalRequest, SessionError> {
        let url = self.endpoint_url(endpoint)?;

        let mut headers = HeaderMap::new();
        insert(&mut headers, COOKIE, &cookie_header(session))?;
        insert(&mut headers, ORIGIN, &self.base_url.origin().ascii_serialization())?;
        insert(&mut headers, USER_AGENT, &self.user_agent)?;

        if surface == RequestSurface::DataApi {
            insert(&mut headers, ACCEPT, JSON_CONTENT_TYPE)?;
        }

        if method != Method::GET {
            if !session.csrf_meta().is_empty() {
                insert(
                    &mut headers,
                    HeaderName::from_static(META_CSRF_HEADER),
                    session.csrf_meta(),
                )?;
            }
            if !session.csrf_script().is_empty() {
                insert(
                    &mut headers,
                    HeaderName::from_static(SCRIPT_CSRF_HEADER),
                    session.csrf_script(),
                )?;
            }

            match surface {
                RequestSurface::Ajax => {
                    insert(
                        &mut headers,
                        HeaderName::from_static(REQUESTED_WITH_HEADER),
                        XML_HTTP_REQUEST,
                    )?;
                }
                RequestSurface::AjaxForm => {
                    insert(
                        &mut headers,
                        HeaderName::from_static(REQUESTED_WITH_HEADER),
                        XML_HTTP_REQUEST,
                    )?;
                    insert(&mut headers, CONTENT_TYPE, FORM_CONTENT_TYPE)?;
                }
                RequestSurface::Form => {
                    insert(&mut headers, CONTENT_TYPE, FORM_CONTENT_TYPE)?;
                }
                RequestSurface::DataApi => {
                    insert(&mut headers, CONTENT_TYPE, JSON_CONTENT_TYPE)?;
                }
            }
        }

        Ok(PortalRequest::new(method, url)
            .with_headers(headers)
            .with_body(body))
    }
}

/// Consent marker first, then the session cookie when one is held.
pub fn cookie_header(session: &SessionState) -> String {
    let mut cookie = format!("{CONSENT_COOKIE_NAME}={CONSENT_COOKIE_VALUE}");
    if let Some(value) = session.cookie() {
        cookie.push_str("; ");
        cookie.push_str(SESSION_COOKIE);
        cookie.push('=');
        cookie.push_str(value);
    }
    cookie
}

fn insert(headers: &mut HeaderMap, name: HeaderName, value: &str) -> Result<(), SessionError> {
    let header_value = HeaderValue::from_str(value)
        .map_err(|_| SessionError::InvalidHeader(name.to_string()))?;
    headers.insert(name, header_value);
    Ok(())
}
