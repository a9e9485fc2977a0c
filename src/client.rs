//! High level portal client.
//!
//! Wires the transport, the token extractor, the login flow and the request
//! builder together behind one session guard, and exposes a small
//! `(method, endpoint, body)` surface to callers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::{HeaderMap, Method};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::Mutex;
use url::Url;

use crate::config::{ConfigError, DEFAULT_BASE_URL, DEFAULT_USER_AGENT, PortalSettings};
use crate::events::{EventDispatcher, EventHandler, ReloginEvent, RequestEvent, SessionEvent};
use crate::session::login::DEFAULT_LOGIN_TIMEOUT;
use crate::session::request::cookie_header;
use crate::session::{
	Credentials, LOGIN_PATH, LoginFlow, PortalTokenExtractor, RequestBuilder, SessionError,
	SessionState, TokenExtractor,
};
use crate::transport::reqwest_client::DEFAULT_REQUEST_TIMEOUT;
use crate::transport::{
	PortalHttpClient, PortalHttpResponse, PortalRequest, ReqwestPortalHttpClient, TlsTrustPolicy,
	TransportError,
};

/// Result alias used across the client layer.
pub type PortalResult<T> = Result<T, PortalError>;

/// Error surfaced to callers of [`PortalClient`].
#[derive(Debug, Error)]
pub enum PortalError {
	#[error(transparent)]
	Session(#[from] SessionError),
	#[error("configuration error: {0}")]
	Config(#[from] ConfigError),
	#[error("{url} answered unexpected status {status}")]
	UnexpectedStatus { url: Url, status: u16 },
	#[error("response decoding failed: {0}")]
	Decode(#[from] serde_json::Error),
}

impl From<TransportError> for PortalError {
	fn from(err: TransportError) -> Self {
		PortalError::Session(SessionError::Network(err))
	}
}

impl PortalError {
	pub fn is_authentication(&self) -> bool {
		matches!(self, PortalError::Session(err) if err.is_authentication())
	}
}

/// Read-only HTTP response returned by the client.
#[derive(Debug, Clone)]
pub struct PortalResponse {
	status: u16,
	headers: HeaderMap,
	body: Bytes,
	url: Url,
}

impl PortalResponse {
	fn from_http(response: PortalHttpResponse) -> Self {
		Self {
			status: response.status,
			headers: response.headers,
			body: response.body,
			url: response.url,
		}
	}

	pub fn status(&self) -> u16 {
		self.status
	}

	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}

	pub fn url(&self) -> &Url {
		&self.url
	}

	pub fn headers(&self) -> &HeaderMap {
		&self.headers
	}

	/// Body as text, invalid UTF-8 replaced.
	pub fn text(&self) -> String {
		String::from_utf8_lossy(&self.body).into_owned()
	}

	pub fn bytes(&self) -> Bytes {
		self.body.clone()
	}

	pub fn json<T: DeserializeOwned>(&self) -> PortalResult<T> {
		Ok(serde_json::from_slice(&self.body)?)
	}
}

/// Client configuration used by the builder.
#[derive(Clone)]
pub struct PortalClientConfig {
	pub base_url: String,
	pub credentials: Credentials,
	pub tls: TlsTrustPolicy,
	pub request_timeout: Duration,
	pub login_timeout: Duration,
	pub relogin_on_expiry: bool,
	pub user_agent: String,
	pub transport: Option<Arc<dyn PortalHttpClient>>,
	pub extractor: Option<Arc<dyn TokenExtractor>>,
	pub event_handlers: Vec<Arc<dyn EventHandler>>,
}

impl PortalClientConfig {
	pub fn new(credentials: Credentials) -> Self {
		Self {
			base_url: DEFAULT_BASE_URL.to_string(),
			credentials,
			tls: TlsTrustPolicy::default(),
			request_timeout: DEFAULT_REQUEST_TIMEOUT,
			login_timeout: DEFAULT_LOGIN_TIMEOUT,
			relogin_on_expiry: true,
			user_agent: DEFAULT_USER_AGENT.to_string(),
			transport: None,
			extractor: None,
			event_handlers: Vec::new(),
		}
	}
}

/// Fluent builder for [`PortalClient`].
pub struct PortalClientBuilder {
	config: PortalClientConfig,
}

impl PortalClientBuilder {
	pub fn new(identity: impl Into<String>, secret: impl Into<String>) -> Self {
		Self {
			config: PortalClientConfig::new(Credentials::new(identity, secret)),
		}
	}

	/// Start from loaded settings. Reads the CA certificate, if any.
	pub fn from_settings(settings: &PortalSettings) -> PortalResult<Self> {
		settings.validate()?;
		let mut builder = Self::new(settings.identity.clone(), settings.secret.clone())
			.with_base_url(settings.base_url.clone())
			.with_tls_policy(settings.tls_policy()?)
			.with_request_timeout(settings.request_timeout())
			.with_user_agent(settings.user_agent());
		if !settings.relogin_on_expiry {
			builder = builder.disable_relogin_on_expiry();
		}
		Ok(builder)
	}

	pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
		self.config.base_url = base_url.into();
		self
	}

	pub fn with_tls_policy(mut self, policy: TlsTrustPolicy) -> Self {
		self.config.tls = policy;
		self
	}

	pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
		self.config.request_timeout = timeout;
		self
	}

	pub fn with_login_timeout(mut self, timeout: Duration) -> Self {
		self.config.login_timeout = timeout;
		self
	}

	pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
		self.config.user_agent = user_agent.into();
		self
	}

	pub fn disable_relogin_on_expiry(mut self) -> Self {
		self.config.relogin_on_expiry = false;
		self
	}

	/// Replace the reqwest transport, e.g. with a stub.
	pub fn with_transport(mut self, transport: Arc<dyn PortalHttpClient>) -> Self {
		self.config.transport = Some(transport);
		self
	}

	pub fn with_token_extractor(mut self, extractor: Arc<dyn TokenExtractor>) -> Self {
		self.config.extractor = Some(extractor);
		self
	}

	pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
		self.config.event_handlers.push(handler);
		self
	}

	pub fn build(self) -> PortalResult<PortalClient> {
		PortalClient::with_config(self.config)
	}
}

/// Authenticated session client for the portal.
///
/// One client owns one session. Concurrent callers are serialised around
/// the "authenticated? else log in" check so only one handshake runs at a
/// time; data requests themselves go out without holding the guard.
pub struct PortalClient {
	requests: RequestBuilder,
	flow: LoginFlow,
	transport: Arc<dyn PortalHttpClient>,
	events: Arc<EventDispatcher>,
	session: Mutex<SessionState>,
	relogin_on_expiry: bool,
}

impl PortalClient {
	pub fn new(identity: impl Into<String>, secret: impl Into<String>) -> PortalResult<Self> {
		PortalClientBuilder::new(identity, secret).build()
	}

	pub fn builder(identity: impl Into<String>, secret: impl Into<String>) -> PortalClientBuilder {
		PortalClientBuilder::new(identity, secret)
	}

	pub fn from_settings(settings: &PortalSettings) -> PortalResult<Self> {
		PortalClientBuilder::from_settings(settings)?.build()
	}

	fn with_config(config: PortalClientConfig) -> PortalResult<Self> {
		let base_url = Url::parse(&config.base_url).map_err(ConfigError::BaseUrl)?;

		let transport: Arc<dyn PortalHttpClient> = match config.transport {
			Some(transport) => transport,
			None => Arc::new(ReqwestPortalHttpClient::new(&config.tls, config.request_timeout)?),
		};
		let extractor: Arc<dyn TokenExtractor> = config
			.extractor
			.unwrap_or_else(|| Arc::new(PortalTokenExtractor::new()));

		let mut events = EventDispatcher::with_logging();
		for handler in config.event_handlers {
			events.register_handler(handler);
		}
		let events = Arc::new(events);

		let requests = RequestBuilder::new(base_url, config.user_agent);
		let flow = LoginFlow::new(
			transport.clone(),
			extractor,
			requests.clone(),
			config.credentials,
			events.clone(),
		)
		.with_timeout(config.login_timeout);

		log::debug!("portal client configured for {}", requests.base_url());

		Ok(Self {
			requests,
			flow,
			transport,
			events,
			session: Mutex::new(SessionState::new()),
			relogin_on_expiry: config.relogin_on_expiry,
		})
	}

	pub fn base_url(&self) -> &Url {
		self.requests.base_url()
	}

	pub async fn is_authenticated(&self) -> bool {
		self.session.lock().await.is_authenticated()
	}

	/// Copy of the current session, for inspection.
	pub async fn session(&self) -> SessionState {
		self.session.lock().await.clone()
	}

	/// Log in now instead of on the first request.
	pub async fn login(&self) -> PortalResult<()> {
		let mut session = self.session.lock().await;
		if !session.is_authenticated() {
			self.flow.login(&mut session).await?;
		}
		Ok(())
	}

	/// Forget the session; the next request logs in again.
	pub async fn reset_session(&self) {
		self.session.lock().await.reset();
	}

	/// Compose an authenticated request, logging in first if needed.
	pub async fn build_request(
		&self,
		method: Method,
		endpoint: &str,
		body: Option<Vec<u8>>,
	) -> PortalResult<PortalRequest> {
		let mut session = self.session.lock().await;
		let request = self
			.requests
			.build(&self.flow, &mut session, method, endpoint, body.map(Bytes::from))
			.await?;
		Ok(request)
	}

	/// Send a request produced by [`build_request`](Self::build_request).
	pub async fn send(&self, request: &PortalRequest) -> PortalResult<PortalResponse> {
		let response = self.send_raw(request).await?;
		Ok(PortalResponse::from_http(response))
	}

	/// Build and send. A response showing that the portal dropped the
	/// session triggers one fresh login and one resend.
	pub async fn request(
		&self,
		method: Method,
		endpoint: &str,
		body: Option<Vec<u8>>,
	) -> PortalResult<PortalResponse> {
		let request = self.build_request(method.clone(), endpoint, body.clone()).await?;
		let response = self.send_raw(&request).await?;

		if !self.relogin_on_expiry || !is_session_expired(&response) {
			return Ok(PortalResponse::from_http(response));
		}

		self.events.dispatch(SessionEvent::Relogin(ReloginEvent {
			url: request.url.clone(),
			status: response.status,
			timestamp: chrono::Utc::now(),
		}));
		self.invalidate_session(request.header("cookie")).await;

		let retry = self.build_request(method, endpoint, body).await?;
		let response = self.send_raw(&retry).await?;
		Ok(PortalResponse::from_http(response))
	}

	pub async fn get(&self, endpoint: &str) -> PortalResult<PortalResponse> {
		self.request(Method::GET, endpoint, None).await
	}

	pub async fn post(&self, endpoint: &str, body: Vec<u8>) -> PortalResult<PortalResponse> {
		self.request(Method::POST, endpoint, Some(body)).await
	}

	async fn send_raw(&self, request: &PortalRequest) -> PortalResult<PortalHttpResponse> {
		let started = Instant::now();
		let response = self.transport.send(request).await?;

		self.events.dispatch(SessionEvent::Request(RequestEvent {
			method: request.method.clone(),
			url: request.url.clone(),
			status: response.status,
			latency: started.elapsed(),
			timestamp: chrono::Utc::now(),
		}));

		Ok(response)
	}

	/// Reset the session unless another caller already replaced the one the
	/// failed request was sent with.
	async fn invalidate_session(&self, sent_cookie: Option<&str>) {
		let mut session = self.session.lock().await;
		if sent_cookie == Some(cookie_header(&session).as_str()) {
			session.reset();
		}
	}
}

/// 401, or a redirect back to the login page.
pub fn is_session_expired(response: &PortalHttpResponse) -> bool {
	if response.status == 401 {
		return true;
	}
	if !response.is_redirect() {
		return false;
	}

	response
		.location()
		.and_then(|location| response.url.join(location).ok())
		.map(|target| target.path().trim_end_matches('/') == LOGIN_PATH)
		.unwrap_or(false)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_support::{StubPortal, json, login_page, redirect, status};

	fn client(stub: &Arc<StubPortal>) -> PortalClient {
		PortalClient::builder("user@example.com", "hunter2")
			.with_base_url("https://portal.test")
			.with_transport(stub.clone())
			.build()
			.unwrap()
	}

	fn handshake() -> Vec<PortalHttpResponse> {
		vec![
			login_page("abc123", Some("sess1")),
			status(200),
			redirect("/", None),
		]
	}

	#[tokio::test]
	async fn builds_authenticated_request_after_lazy_login() {
		let stub = Arc::new(StubPortal::new(handshake()));
		let client = client(&stub);

		let request = client
			.build_request(Method::GET, "/pfapi/dns/domain-list", None)
			.await
			.unwrap();

		assert_eq!(request.url.as_str(), "https://portal.test/pfapi/dns/domain-list");
		assert_eq!(
			request.header("cookie"),
			Some("CookieSettingsGroupId=2464190; SESSID=sess1")
		);
		assert!(client.is_authenticated().await);
		assert_eq!(stub.requests().len(), 3);
	}

	#[tokio::test]
	async fn rejected_login_sends_no_data_request() {
		let stub = Arc::new(StubPortal::new(vec![
			login_page("abc123", Some("sess1")),
			status(200),
			status(200),
		]));
		let client = client(&stub);

		let err = client.get("/pfapi/dns/domain-list").await.unwrap_err();

		assert!(err.is_authentication());
		assert!(!client.is_authenticated().await);
		assert!(stub
			.requests()
			.iter()
			.all(|request| !request.url.path().starts_with("/pfapi/")));
	}

	#[tokio::test]
	async fn slow_handshake_hits_the_login_deadline() {
		let stub = Arc::new(StubPortal::new(handshake()).with_delay(Duration::from_secs(5)));
		let client = PortalClient::builder("user@example.com", "hunter2")
			.with_base_url("https://portal.test")
			.with_transport(stub.clone())
			.with_login_timeout(Duration::from_millis(100))
			.build()
			.unwrap();

		let err = client.login().await.unwrap_err();

		assert!(matches!(
			err,
			PortalError::Session(SessionError::Network(TransportError::Timeout(_)))
		));
		assert!(!client.is_authenticated().await);
		assert_eq!(stub.requests().len(), 1);
	}

	#[tokio::test]
	async fn invalid_endpoint_fails_before_login() {
		let stub = Arc::new(StubPortal::new(Vec::new()));
		let client = client(&stub);

		let err = client.build_request(Method::GET, "pfapi", None).await.unwrap_err();

		assert!(matches!(err, PortalError::Session(SessionError::InvalidUrl { .. })));
		assert!(stub.requests().is_empty());
	}

	#[tokio::test]
	async fn logs_in_only_once_for_consecutive_requests() {
		let mut responses = handshake();
		responses.push(json("[]"));
		responses.push(json("[]"));
		let stub = Arc::new(StubPortal::new(responses));
		let client = client(&stub);

		client.get("/pfapi/dns/domain-list").await.unwrap();
		client.get("/pfapi/dns/domain-list").await.unwrap();

		assert_eq!(stub.requests().len(), 5);
	}

	#[tokio::test]
	async fn expired_session_logs_in_again_and_resends() {
		let mut responses = handshake();
		responses.push(redirect("https://portal.test/login", None));
		responses.push(login_page("def456", Some("sess2")));
		responses.push(status(200));
		responses.push(redirect("/", None));
		responses.push(json("[\"example.de\"]"));
		let stub = Arc::new(StubPortal::new(responses));
		let client = client(&stub);

		let response = client.get("/pfapi/dns/domain-list").await.unwrap();

		assert_eq!(response.status(), 200);
		let sent = stub.requests();
		assert_eq!(sent.len(), 8);
		assert_eq!(
			sent[7].header("cookie"),
			Some("CookieSettingsGroupId=2464190; SESSID=sess2")
		);
		assert_eq!(client.session().await.csrf_form(), "def456");
	}

	#[tokio::test]
	async fn expiry_handling_can_be_disabled() {
		let mut responses = handshake();
		responses.push(status(401));
		let stub = Arc::new(StubPortal::new(responses));
		let client = PortalClient::builder("user@example.com", "hunter2")
			.with_base_url("https://portal.test")
			.with_transport(stub.clone())
			.disable_relogin_on_expiry()
			.build()
			.unwrap();

		let response = client.get("/pfapi/dns/domain-list").await.unwrap();

		assert_eq!(response.status(), 401);
		assert_eq!(stub.requests().len(), 4);
		assert!(client.is_authenticated().await);
	}

	#[tokio::test]
	async fn concurrent_callers_share_one_handshake() {
		let mut responses = handshake();
		responses.push(json("[]"));
		responses.push(json("[]"));
		let stub = Arc::new(StubPortal::new(responses));
		let client = Arc::new(client(&stub));

		let (first, second) = tokio::join!(
			client.build_request(Method::GET, "/pfapi/dns/domain-list", None),
			client.build_request(Method::GET, "/pfapi/dns/domain-list", None),
		);

		assert!(first.is_ok() && second.is_ok());
		let logins = stub
			.requests()
			.iter()
			.filter(|request| request.url.path() == LOGIN_PATH)
			.count();
		assert_eq!(logins, 2);
	}

	#[test]
	fn detects_expired_session_responses() {
		assert!(is_session_expired(&status(401)));
		assert!(is_session_expired(&redirect("/login", None)));
		assert!(is_session_expired(&redirect("https://portal.test/login/", None)));
		assert!(!is_session_expired(&redirect("/dashboard", None)));
		assert!(!is_session_expired(&status(200)));
	}

	#[test]
	fn bad_base_url_is_a_config_error() {
		let result = PortalClient::builder("u", "p")
			.with_base_url("::not a url::")
			.with_transport(Arc::new(StubPortal::new(Vec::new())))
			.build();
		assert!(matches!(result, Err(PortalError::Config(ConfigError::BaseUrl(_)))));
	}
}
