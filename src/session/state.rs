//! Session value owned by one client.

use super::extractor::PageTokens;

/// Cookie, CSRF tokens and the authenticated flag for one portal session.
///
/// Plain data with no I/O and no locking; the client keeps it behind a mutex
/// and the login flow is the only writer.
#[derive(Clone, Default)]
pub struct SessionState {
    cookie: String,
    csrf_form: String,
    csrf_meta: String,
    csrf_script: String,
    authenticated: bool,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_tokens(
        &mut self,
        form: impl Into<String>,
        meta: impl Into<String>,
        script: impl Into<String>,
    ) {
        self.csrf_form = form.into();
        self.csrf_meta = meta.into();
        self.csrf_script = script.into();
    }

    pub fn set_page_tokens(&mut self, tokens: PageTokens) {
        self.set_tokens(tokens.form, tokens.meta, tokens.script);
    }

    pub fn set_cookie(&mut self, value: impl Into<String>) {
        self.cookie = value.into();
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub(crate) fn mark_authenticated(&mut self) {
        self.authenticated = true;
    }

    /// Back to a fresh, unauthenticated session.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn cookie(&self) -> Option<&str> {
        (!self.cookie.is_empty()).then_some(self.cookie.as_str())
    }

    pub fn csrf_form(&self) -> &str {
        &self.csrf_form
    }

    pub fn csrf_meta(&self) -> &str {
        &self.csrf_meta
    }

    pub fn csrf_script(&self) -> &str {
        &self.csrf_script
    }

    pub fn has_form_token(&self) -> bool {
        !self.csrf_form.is_empty()
    }
}

// Tokens and the cookie are credentials in their own right.
impl std::fmt::Debug for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionState")
            .field("cookie", &self.cookie().is_some())
            .field("csrf_form", &!self.csrf_form.is_empty())
            .field("csrf_meta", &!self.csrf_meta.is_empty())
            .field("csrf_script", &!self.csrf_script.is_empty())
            .field("authenticated", &self.authenticated)
            .finish()
    }
}
