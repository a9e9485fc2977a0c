//! Login page scraping.
//!
//! The portal publishes its CSRF tokens in three places: a hidden `csrf`
//! input inside the login form, a `<meta name="csrf">` tag, and a JSON-ish
//! blob in an inline script (`"CSRF_TOKEN":"..."`). Only the form token is
//! mandatory. Scraping sits behind [`TokenExtractor`] so the script parsing
//! can be replaced without touching the login flow.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;

/// Tokens recovered from one page.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct PageTokens {
    pub form: String,
    pub meta: String,
    pub script: String,
}

impl std::fmt::Debug for PageTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageTokens")
            .field("form", &!self.form.is_empty())
            .field("meta", &!self.meta.is_empty())
            .field("script", &!self.script.is_empty())
            .finish()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("csrf input not found in the login form")]
    TokenNotFound,
}

pub trait TokenExtractor: Send + Sync {
    fn extract(&self, html: &str) -> Result<PageTokens, ExtractError>;
}

/// Extractor for the united-domains login page markup.
#[derive(Debug, Default, Clone, Copy)]
pub struct PortalTokenExtractor;

impl PortalTokenExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl TokenExtractor for PortalTokenExtractor {
    fn extract(&self, html: &str) -> Result<PageTokens, ExtractError> {
        let document = Html::parse_document(html);

        let form = form_token(&document).ok_or(ExtractError::TokenNotFound)?;
        let meta = meta_token(&document).unwrap_or_default();
        let script = script_token(html).unwrap_or_default();

        Ok(PageTokens { form, meta, script })
    }
}

static FORM: Lazy<Selector> = Lazy::new(|| Selector::parse("form").unwrap());
static CSRF_INPUT: Lazy<Selector> = Lazy::new(|| Selector::parse(r#"input[name="csrf"]"#).unwrap());
static SELECTOR_INPUT: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"input[name="selector"]"#).unwrap());
static CSRF_META: Lazy<Selector> = Lazy::new(|| Selector::parse(r#"meta[name="csrf"]"#).unwrap());

static SCRIPT_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""CSRF_TOKEN":"((?:[^"\\]|\\.)*)""#).unwrap());

fn form_token(document: &Html) -> Option<String> {
    document
        .select(&FORM)
        .filter(|form| is_login_form(*form))
        .find_map(|form| {
            form.select(&CSRF_INPUT)
                .filter_map(|input| input.value().attr("value"))
                .find(|value| !value.is_empty())
                .map(str::to_string)
        })
}

fn is_login_form(form: ElementRef<'_>) -> bool {
    let element = form.value();

    let named_login = ["id", "name"]
        .iter()
        .filter_map(|attr| element.attr(attr))
        .any(|value| value.to_ascii_lowercase().contains("login"));
    if named_login {
        return true;
    }

    let posts_to_login = element
        .attr("action")
        .map(|action| {
            let path = action.split(['?', '#']).next().unwrap_or("");
            let path = path.trim_end_matches('/');
            path == "login" || path.ends_with("/login")
        })
        .unwrap_or(false);
    if posts_to_login {
        return true;
    }

    form.select(&SELECTOR_INPUT)
        .any(|input| input.value().attr("value") == Some("login"))
}

fn meta_token(document: &Html) -> Option<String> {
    document
        .select(&CSRF_META)
        .filter_map(|meta| meta.value().attr("content"))
        .next()
        .map(str::to_string)
}

/// Token following the `"CSRF_TOKEN":"` marker anywhere in the document.
pub(crate) fn script_token(html: &str) -> Option<String> {
    if let Some(token) = find_script_token(html) {
        return Some(token);
    }

    // Blobs stored in attributes arrive entity-encoded (`&quot;CSRF_TOKEN&quot;`).
    let decoded = html_escape::decode_html_entities(html);
    find_script_token(&decoded)
}

fn find_script_token(text: &str) -> Option<String> {
    let raw = SCRIPT_TOKEN_RE.captures(text)?.get(1)?.as_str();
    let quoted = format!("\"{raw}\"");
    Some(serde_json::from_str::<String>(&quoted).unwrap_or_else(|_| raw.to_string()))
}

/// Value of the cookie `name` among `Set-Cookie` header values.
///
/// The last occurrence wins. An empty value means the server cleared the
/// cookie and yields `None`.
pub fn session_cookie<'a, I>(set_cookies: I, name: &str) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    set_cookies
        .into_iter()
        .filter_map(|line| {
            let pair = line.split(';').next()?;
            let (cookie_name, value) = pair.split_once('=')?;
            (cookie_name.trim() == name).then(|| value.trim().trim_matches('"').to_string())
        })
        .last()
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOGIN_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <meta name="csrf" content="meta-456">
  <script>
    window.UD = {"LANG":"de","CSRF_TOKEN":"script-789","USER":null};
  </script>
</head>
<body>
  <form id="search" action="/search"><input name="csrf" value="wrong"></form>
  <form id="login-form" method="post" action="/login">
    <input type="hidden" name="csrf" value="abc123">
    <input type="hidden" name="selector" value="login">
    <input name="email"><input type="password" name="pwd">
    <input type="submit" name="submit" value="Login">
  </form>
</body>
</html>"#;

    #[test]
    fn extracts_all_three_tokens() {
        let tokens = PortalTokenExtractor.extract(LOGIN_PAGE).unwrap();

        assert_eq!(tokens.form, "abc123");
        assert_eq!(tokens.meta, "meta-456");
        assert_eq!(tokens.script, "script-789");
    }

    #[test]
    fn ignores_csrf_inputs_outside_the_login_form() {
        let html = r#"<form action="/newsletter"><input name="csrf" value="other"></form>"#;
        assert_eq!(PortalTokenExtractor.extract(html), Err(ExtractError::TokenNotFound));
    }

    #[test]
    fn recognises_login_form_by_selector_field() {
        let html = r#"<form method="post">
            <input name="selector" value="login"><input name="csrf" value="tok">
        </form>"#;
        assert_eq!(PortalTokenExtractor.extract(html).unwrap().form, "tok");
    }

    #[test]
    fn missing_form_token_is_an_error() {
        let html = r#"<meta name="csrf" content="meta"><form id="login"><input name="email"></form>
            <script>{"CSRF_TOKEN":"s"}</script>"#;
        assert_eq!(PortalTokenExtractor.extract(html), Err(ExtractError::TokenNotFound));
    }

    #[test]
    fn empty_form_token_is_an_error() {
        let html = r#"<form action="/login"><input name="csrf" value=""></form>"#;
        assert_eq!(PortalTokenExtractor.extract(html), Err(ExtractError::TokenNotFound));
    }

    #[test]
    fn optional_tokens_default_to_empty() {
        let html = r#"<form action="/login?next=%2F"><input name="csrf" value="only-form"></form>"#;
        let tokens = PortalTokenExtractor.extract(html).unwrap();

        assert_eq!(tokens.form, "only-form");
        assert!(tokens.meta.is_empty());
        assert!(tokens.script.is_empty());
    }

    #[test]
    fn survives_truncated_markup() {
        let html = r#"<html><body><form name="loginForm"><input name="csrf" value="cut"#;
        // must not panic, whatever html5ever makes of the dangling attribute
        let _ = PortalTokenExtractor.extract(html);

        let html = r#"<div><form name="loginForm"><input name="csrf" value="cut"><p>unclosed"#;
        assert_eq!(PortalTokenExtractor.extract(html).unwrap().form, "cut");
    }

    #[test]
    fn decodes_json_escapes_in_script_token() {
        let html = r#"<script>var c = {"CSRF_TOKEN":"a\/b\u0041\"q"};</script>"#;
        assert_eq!(script_token(html).as_deref(), Some("a/bA\"q"));
    }

    #[test]
    fn finds_entity_encoded_script_token() {
        let html = r#"<div data-config="{&quot;CSRF_TOKEN&quot;:&quot;attr-tok&quot;}"></div>"#;
        assert_eq!(script_token(html).as_deref(), Some("attr-tok"));
    }

    #[test]
    fn reads_named_cookie_from_set_cookie_lines() {
        let lines = [
            "CookieSettingsGroupId=2464190; Path=/",
            "SESSID=sess1; Path=/; HttpOnly; Secure",
        ];
        assert_eq!(session_cookie(lines, "SESSID").as_deref(), Some("sess1"));
        assert_eq!(session_cookie(lines, "OTHER"), None);
    }

    #[test]
    fn last_session_cookie_wins_and_empty_clears() {
        assert_eq!(
            session_cookie(["SESSID=old", "SESSID=new; Path=/"], "SESSID").as_deref(),
            Some("new")
        );
        assert_eq!(session_cookie(["SESSID=; Max-Age=0"], "SESSID"), None);
    }
}
