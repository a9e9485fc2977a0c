//! Session events.
//!
//! The login flow and the client report what they do through an
//! [`EventDispatcher`]. [`LoggingHandler`] turns events into `log` records;
//! events never carry bodies, tokens or credentials.

use chrono::{DateTime, Utc};
use http::Method;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::session::LoginStage;

/// One login state machine transition.
#[derive(Debug, Clone)]
pub struct TransitionEvent {
    pub from: LoginStage,
    pub to: LoginStage,
    pub url: Option<Url>,
    pub status: Option<u16>,
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Data request sent on an authenticated session.
#[derive(Debug, Clone)]
pub struct RequestEvent {
    pub method: Method,
    pub url: Url,
    pub status: u16,
    pub latency: Duration,
    pub timestamp: DateTime<Utc>,
}

/// The portal dropped the session and the client logged in again.
#[derive(Debug, Clone)]
pub struct ReloginEvent {
    pub url: Url,
    pub status: u16,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    Transition(TransitionEvent),
    Request(RequestEvent),
    Relogin(ReloginEvent),
}

pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &SessionEvent);
}

/// Broadcasts events to registered handlers.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    /// Dispatcher with a [`LoggingHandler`] already registered.
    pub fn with_logging() -> Self {
        let mut dispatcher = Self::new();
        dispatcher.register_handler(Arc::new(LoggingHandler));
        dispatcher
    }

    pub fn register_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn dispatch(&self, event: SessionEvent) {
        for handler in &self.handlers {
            handler.handle(&event);
        }
    }
}

/// Logs events using the `log` crate.
#[derive(Debug)]
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn handle(&self, event: &SessionEvent) {
        match event {
            SessionEvent::Transition(transition) if transition.to == LoginStage::Failed => {
                log::warn!(
                    "login failed in {:?}: {}",
                    transition.from,
                    transition.detail.as_deref().unwrap_or("unknown error")
                );
            }
            SessionEvent::Transition(transition) if transition.to == LoginStage::LoggedIn => {
                log::info!("portal login succeeded");
            }
            SessionEvent::Transition(transition) => {
                log::debug!(
                    "login {:?} -> {:?} ({} {})",
                    transition.from,
                    transition.to,
                    transition.url.as_ref().map(Url::as_str).unwrap_or("-"),
                    transition
                        .status
                        .map(|status| status.to_string())
                        .unwrap_or_else(|| "-".into())
                );
            }
            SessionEvent::Request(request) => {
                log::debug!(
                    "{} {} -> {} ({:.2}s)",
                    request.method,
                    request.url,
                    request.status,
                    request.latency.as_secs_f64()
                );
            }
            SessionEvent::Relogin(relogin) => {
                log::info!(
                    "session expired ({} answered {}), logging in again",
                    relogin.url,
                    relogin.status
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(LoginStage, LoginStage)>>,
    }

    impl EventHandler for Recorder {
        fn handle(&self, event: &SessionEvent) {
            if let SessionEvent::Transition(transition) = event {
                self.seen.lock().unwrap().push((transition.from, transition.to));
            }
        }
    }

    #[test]
    fn dispatches_to_every_handler() {
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());
        let mut dispatcher = EventDispatcher::with_logging();
        dispatcher.register_handler(first.clone());
        dispatcher.register_handler(second.clone());

        dispatcher.dispatch(SessionEvent::Transition(TransitionEvent {
            from: LoginStage::NoSession,
            to: LoginStage::TokensFetched,
            url: None,
            status: Some(200),
            detail: None,
            timestamp: Utc::now(),
        }));

        let expected = vec![(LoginStage::NoSession, LoginStage::TokensFetched)];
        assert_eq!(*first.seen.lock().unwrap(), expected);
        assert_eq!(*second.seen.lock().unwrap(), expected);
    }
}
