//! # uniteddomains-rs
//!
//! Session client for the united-domains customer portal, which has no
//! public API. The client behaves like a browser: it loads the login page,
//! scrapes the CSRF tokens and the `SESSID` cookie, records a locale, submits
//! the login form and then replays cookie and tokens on every request.
//!
//! ## Features
//!
//! - Lazy login on the first request, serialised for concurrent callers
//! - Explicit login state machine with per-step errors
//! - One-shot re-login when the portal drops the session
//! - Custom CA bundle or explicit opt-out of certificate verification
//! - Settings from `UNTDDMNS_*` environment variables or JSON
//!
//! ## Example
//!
//! ```no_run
//! use uniteddomains_rs::{PortalClient, PortalSettings};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = PortalSettings::from_env()?;
//!     let client = PortalClient::from_settings(&settings)?;
//!     let domains = client.domain_list().await?;
//!     println!("{:?}", domains.domain_names());
//!     Ok(())
//! }
//! ```

mod client;

pub mod config;
pub mod domains;
pub mod events;
pub mod session;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use crate::client::{
    PortalClient,
    PortalClientBuilder,
    PortalClientConfig,
    PortalError,
    PortalResponse,
    PortalResult,
    is_session_expired,
};

pub use crate::config::{ConfigError, PortalSettings};

pub use crate::domains::{DOMAIN_LIST_PATH, DomainListing};

pub use crate::events::{
    EventDispatcher,
    EventHandler,
    LoggingHandler,
    ReloginEvent,
    RequestEvent,
    SessionEvent,
    TransitionEvent,
};

pub use crate::session::{
    Credentials,
    ExtractError,
    LoginFlow,
    LoginStage,
    PageTokens,
    PortalTokenExtractor,
    RequestBuilder,
    RequestSurface,
    SessionError,
    SessionState,
    TokenExtractor,
};

pub use crate::transport::{
    PortalHttpClient,
    PortalHttpResponse,
    PortalRequest,
    ReqwestPortalHttpClient,
    TlsTrustPolicy,
    TransportError,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
