//! Client settings.
//!
//! Settings come from the environment (`UNTDDMNS_*`), from a JSON document,
//! or are assembled in code through the client builder. The CA certificate
//! accepts either a file path or inline PEM.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::session::Credentials;
use crate::transport::TlsTrustPolicy;

pub const ENV_EMAIL: &str = "UNTDDMNS_EMAIL";
pub const ENV_PASSWORD: &str = "UNTDDMNS_PASSWORD";
pub const ENV_INSECURE_HTTPS: &str = "UNTDDMNS_INSECURE_HTTPS";
pub const ENV_CA_CERT: &str = "UNTDDMNS_CACERT";

pub const DEFAULT_BASE_URL: &str = "https://www.united-domains.de";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value '{value}' for {key}")]
    Invalid { key: &'static str, value: String },
    #[error("error reading CA certificate {path}: {source}")]
    CaCertificate {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid base url: {0}")]
    BaseUrl(#[from] url::ParseError),
    #[error("invalid settings document: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Clone, Deserialize)]
pub struct PortalSettings {
    #[serde(alias = "email")]
    pub identity: String,
    #[serde(alias = "password")]
    pub secret: String,
    #[serde(default)]
    pub insecure_https: bool,
    #[serde(default)]
    pub ca_certificate: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_relogin")]
    pub relogin_on_expiry: bool,
    #[serde(default)]
    pub user_agent: Option<String>,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_relogin() -> bool {
    true
}

impl PortalSettings {
    pub fn new(identity: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            secret: secret.into(),
            insecure_https: false,
            ca_certificate: None,
            base_url: default_base_url(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            relogin_on_expiry: true,
            user_agent: None,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from a key lookup using the `UNTDDMNS_*` names.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let identity = non_empty(ENV_EMAIL).ok_or(ConfigError::Missing(ENV_EMAIL))?;
        let secret = non_empty(ENV_PASSWORD).ok_or(ConfigError::Missing(ENV_PASSWORD))?;

        let mut settings = Self::new(identity, secret);
        if let Some(raw) = non_empty(ENV_INSECURE_HTTPS) {
            settings.insecure_https = parse_bool(&raw).ok_or(ConfigError::Invalid {
                key: ENV_INSECURE_HTTPS,
                value: raw,
            })?;
        }
        settings.ca_certificate = non_empty(ENV_CA_CERT);

        Ok(settings)
    }

    pub fn from_json_str(document: &str) -> Result<Self, ConfigError> {
        let settings: Self = serde_json::from_str(document)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.identity.trim().is_empty() {
            return Err(ConfigError::Missing("identity"));
        }
        if self.secret.is_empty() {
            return Err(ConfigError::Missing("secret"));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "request_timeout_secs",
                value: "0".into(),
            });
        }
        self.base_url()?;
        Ok(())
    }

    pub fn base_url(&self) -> Result<Url, ConfigError> {
        Ok(Url::parse(&self.base_url)?)
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.identity.clone(), self.secret.clone())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn user_agent(&self) -> &str {
        self.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT)
    }

    /// Trust policy from `ca_certificate` and `insecure_https`.
    pub fn tls_policy(&self) -> Result<TlsTrustPolicy, ConfigError> {
        let mut policy = TlsTrustPolicy::new().danger_skip_verification(self.insecure_https);
        if let Some(ca) = self.ca_certificate.as_deref().filter(|ca| !ca.trim().is_empty()) {
            policy = policy.with_ca_bundle(read_path_or_contents(ca)?);
        }
        Ok(policy)
    }
}

impl std::fmt::Debug for PortalSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortalSettings")
            .field("identity", &self.identity)
            .field("secret", &"<redacted>")
            .field("insecure_https", &self.insecure_https)
            .field("ca_certificate", &self.ca_certificate.is_some())
            .field("base_url", &self.base_url)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("relogin_on_expiry", &self.relogin_on_expiry)
            .finish()
    }
}

/// Inline PEM is returned as is; anything else is read as a file path,
/// with a leading `~/` expanded against `$HOME`.
pub fn read_path_or_contents(value: &str) -> Result<String, ConfigError> {
    let trimmed = value.trim_start();
    if trimmed.starts_with("-----BEGIN") {
        return Ok(value.to_string());
    }

    let path = expand_home(trimmed);
    std::fs::read_to_string(&path).map_err(|source| ConfigError::CaCertificate { path, source })
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return PathBuf::from(home).join(rest);
    }
    PathBuf::from(path)
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim() {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}
