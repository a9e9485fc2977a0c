//! Browser-equivalent session against the portal.
//!
//! The portal has no API tokens. A session is a `SESSID` cookie plus CSRF
//! tokens scraped from the login page, promoted to "authenticated" by a form
//! login that answers with a redirect. This module holds the pieces:
//!
//! - [`extractor`]: recovers the tokens and the session cookie from a page;
//! - [`state`]: the session value itself;
//! - [`login`]: the handshake state machine;
//! - [`request`]: composes authenticated requests on top of a session.

pub mod extractor;
pub mod login;
pub mod request;
pub mod state;

use thiserror::Error;
use url::Url;

use crate::transport::TransportError;

pub use extractor::{ExtractError, PageTokens, PortalTokenExtractor, TokenExtractor, session_cookie};
pub use login::{Credentials, LoginFlow, LoginStage};
pub use request::{RequestBuilder, RequestSurface};
pub use state::SessionState;

pub const LOGIN_PATH: &str = "/login";
pub const LANGUAGE_PATH: &str = "/set-user-language";
pub const LANGUAGE: &str = "en-US";

/// Session cookie issued by the portal.
pub const SESSION_COOKIE: &str = "SESSID";

/// Consent marker the portal expects on every request; without it the
/// portal redirects to its cookie banner.
pub const CONSENT_COOKIE_NAME: &str = "CookieSettingsGroupId";
pub const CONSENT_COOKIE_VALUE: &str = "2464190";

/// Carries the meta-tag token.
pub const META_CSRF_HEADER: &str = "http-x-csrf-token";
/// Carries the script-embedded token.
pub const SCRIPT_CSRF_HEADER: &str = "x-csrf-token";
pub const REQUESTED_WITH_HEADER: &str = "x-requested-with";
pub const XML_HTTP_REQUEST: &str = "XMLHttpRequest";

/// Failures while establishing the session or composing a request on it.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("network error: {0}")]
    Network(#[from] TransportError),
    #[error("handshake step '{step}' failed: {url} answered {status}")]
    Handshake {
        step: &'static str,
        url: Url,
        status: u16,
    },
    #[error("login form csrf token not found on {url}")]
    TokenNotFound { url: Url },
    #[error("authentication rejected: {status} {reason}")]
    Authentication { status: u16, reason: String },
    #[error("invalid url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("header conversion failed: {0}")]
    InvalidHeader(String),
}

impl SessionError {
    pub fn is_authentication(&self) -> bool {
        matches!(self, SessionError::Authentication { .. })
    }
}
