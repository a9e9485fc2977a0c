//! Login handshake as an explicit state machine.
//!
//! ```text
//! NoSession --GET /login--> TokensFetched --POST /set-user-language--> LanguageSet
//!     LanguageSet --POST /login (302)--> LoggedIn
//! any stage --error--> Failed
//! ```
//!
//! The portal does not treat a session as initialised until a locale has been
//! recorded against it, hence the language step between fetching the tokens
//! and submitting the credentials. A session that already holds a form token
//! enters the machine at `LanguageSet` and goes straight to the credentialed
//! post.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use http::Method;
use url::form_urlencoded;

use crate::events::{EventDispatcher, SessionEvent, TransitionEvent};
use crate::transport::{PortalHttpClient, PortalHttpResponse, PortalRequest, TransportError};

use super::extractor::{TokenExtractor, session_cookie};
use super::request::{RequestBuilder, RequestSurface};
use super::state::SessionState;
use super::{LANGUAGE, LANGUAGE_PATH, LOGIN_PATH, SESSION_COOKIE, SessionError};

/// Upper bound for one complete login run.
pub const DEFAULT_LOGIN_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoginStage {
    NoSession,
    TokensFetched,
    LanguageSet,
    LoggedIn,
    Failed,
}

impl LoginStage {
    /// Where a run starts for the given session.
    pub fn entry(session: &SessionState) -> Self {
        if session.is_authenticated() {
            LoginStage::LoggedIn
        } else if session.has_form_token() {
            LoginStage::LanguageSet
        } else {
            LoginStage::NoSession
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, LoginStage::LoggedIn | LoginStage::Failed)
    }
}

/// Portal login. `secret` never appears in `Debug` output.
#[derive(Clone)]
pub struct Credentials {
    identity: String,
    secret: String,
}

impl Credentials {
    pub fn new(identity: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            secret: secret.into(),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub(crate) fn secret(&self) -> &str {
        &self.secret
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("identity", &self.identity)
            .field("secret", &"<redacted>")
            .finish()
    }
}

pub struct LoginFlow {
    transport: Arc<dyn PortalHttpClient>,
    extractor: Arc<dyn TokenExtractor>,
    requests: RequestBuilder,
    credentials: Credentials,
    events: Arc<EventDispatcher>,
    timeout: Duration,
}

impl LoginFlow {
    pub fn new(
        transport: Arc<dyn PortalHttpClient>,
        extractor: Arc<dyn TokenExtractor>,
        requests: RequestBuilder,
        credentials: Credentials,
        events: Arc<EventDispatcher>,
    ) -> Self {
        Self {
            transport,
            extractor,
            requests,
            credentials,
            events,
            timeout: DEFAULT_LOGIN_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Bring the session to `LoggedIn`.
    ///
    /// A run that re-entered with tokens from an earlier cycle and got its
    /// credentials rejected is repeated once from a fresh session; the
    /// tokens may simply have gone stale. A run that started from scratch is
    /// not repeated.
    pub async fn login(&self, session: &mut SessionState) -> Result<(), SessionError> {
        let reused_tokens = LoginStage::entry(session) == LoginStage::LanguageSet;

        match self.run_with_deadline(session).await {
            Err(err) if reused_tokens && err.is_authentication() => {
                log::info!("credentials rejected with reused tokens, repeating the full handshake");
                session.reset();
                self.run_with_deadline(session).await
            }
            other => other,
        }
    }

    async fn run_with_deadline(&self, session: &mut SessionState) -> Result<(), SessionError> {
        match tokio::time::timeout(self.timeout, self.run(session)).await {
            Ok(result) => result,
            Err(_) => Err(SessionError::Network(TransportError::Timeout(format!(
                "login handshake against {}",
                self.requests.base_url()
            )))),
        }
    }

    /// One pass through the machine, from [`LoginStage::entry`] to a
    /// terminal stage.
    pub async fn run(&self, session: &mut SessionState) -> Result<(), SessionError> {
        let mut stage = LoginStage::entry(session);

        while !stage.is_terminal() {
            match self.advance(stage, session).await {
                Ok(next) => stage = next,
                Err(err) => {
                    self.emit(stage, LoginStage::Failed, None, None, Some(err.to_string()));
                    return Err(err);
                }
            }
        }

        Ok(())
    }

    /// Perform the single transition leaving `stage`.
    pub async fn advance(
        &self,
        stage: LoginStage,
        session: &mut SessionState,
    ) -> Result<LoginStage, SessionError> {
        match stage {
            LoginStage::NoSession => self.fetch_tokens(session).await,
            LoginStage::TokensFetched => self.set_language(session).await,
            LoginStage::LanguageSet => self.submit_credentials(session).await,
            LoginStage::LoggedIn | LoginStage::Failed => Ok(stage),
        }
    }

    /// `NoSession -> TokensFetched`: load the login page, scrape the tokens
    /// and pick up the session cookie.
    pub async fn fetch_tokens(
        &self,
        session: &mut SessionState,
    ) -> Result<LoginStage, SessionError> {
        let request = self.requests.compose(
            session,
            Method::GET,
            LOGIN_PATH,
            None,
            RequestSurface::Form,
        )?;
        let response = self.transport.send(&request).await?;

        if response.status != 200 {
            return Err(SessionError::Handshake {
                step: "fetch login page",
                url: request.url,
                status: response.status,
            });
        }

        let tokens = self
            .extractor
            .extract(&response.text())
            .map_err(|_| SessionError::TokenNotFound {
                url: request.url.clone(),
            })?;
        session.set_page_tokens(tokens);

        if !capture_cookie(session, &response) {
            log::debug!("login page did not set {SESSION_COOKIE}");
        }

        self.emit(
            LoginStage::NoSession,
            LoginStage::TokensFetched,
            Some(request.url),
            Some(response.status),
            None,
        );
        Ok(LoginStage::TokensFetched)
    }

    /// `TokensFetched -> LanguageSet`: record a locale against the session.
    pub async fn set_language(
        &self,
        session: &mut SessionState,
    ) -> Result<LoginStage, SessionError> {
        let body = form_urlencoded::Serializer::new(String::new())
            .append_pair("language", LANGUAGE)
            .finish();
        let request = self.requests.compose(
            session,
            Method::POST,
            LANGUAGE_PATH,
            Some(Bytes::from(body)),
            RequestSurface::AjaxForm,
        )?;
        let response = self.transport.send(&request).await?;
        capture_cookie(session, &response);

        if response.status != 200 {
            return Err(SessionError::Handshake {
                step: "set user language",
                url: request.url,
                status: response.status,
            });
        }

        self.emit(
            LoginStage::TokensFetched,
            LoginStage::LanguageSet,
            Some(request.url),
            Some(response.status),
            None,
        );
        Ok(LoginStage::LanguageSet)
    }

    /// `LanguageSet -> LoggedIn`: submit the login form. Only a 302 counts
    /// as success; a 200 is the login page rendered again.
    pub async fn submit_credentials(
        &self,
        session: &mut SessionState,
    ) -> Result<LoginStage, SessionError> {
        let request = self.credentials_request(session)?;
        let response = self.transport.send(&request).await?;
        capture_cookie(session, &response);

        if response.status != 302 {
            return Err(SessionError::Authentication {
                status: response.status,
                reason: response.reason().to_string(),
            });
        }

        session.mark_authenticated();
        self.emit(
            LoginStage::LanguageSet,
            LoginStage::LoggedIn,
            Some(request.url),
            Some(response.status),
            None,
        );
        Ok(LoginStage::LoggedIn)
    }

    fn credentials_request(&self, session: &SessionState) -> Result<PortalRequest, SessionError> {
        let body = form_urlencoded::Serializer::new(String::new())
            .append_pair("csrf", session.csrf_form())
            .append_pair("selector", "login")
            .append_pair("email", self.credentials.identity())
            .append_pair("pwd", self.credentials.secret())
            .append_pair("submit", "Login")
            .finish();

        self.requests.compose(
            session,
            Method::POST,
            LOGIN_PATH,
            Some(Bytes::from(body)),
            RequestSurface::Form,
        )
    }

    fn emit(
        &self,
        from: LoginStage,
        to: LoginStage,
        url: Option<url::Url>,
        status: Option<u16>,
        detail: Option<String>,
    ) {
        self.events.dispatch(SessionEvent::Transition(TransitionEvent {
            from,
            to,
            url,
            status,
            detail,
            timestamp: Utc::now(),
        }));
    }
}

/// Store a `SESSID` handed out by `response`. The portal issues one on the
/// login page and may rotate it on later handshake steps.
fn capture_cookie(session: &mut SessionState, response: &PortalHttpResponse) -> bool {
    match session_cookie(response.set_cookies(), SESSION_COOKIE) {
        Some(cookie) => {
            session.set_cookie(cookie);
            true
        }
        None => false,
    }
}
