//! TLS trust configuration for the portal transport.
//!
//! Combines an optional PEM CA bundle with an explicit opt-in to skip
//! certificate verification, and applies both to a `reqwest::ClientBuilder`.

use reqwest::{Certificate, ClientBuilder};

use super::TransportError;

#[derive(Clone, Default)]
pub struct TlsTrustPolicy {
    ca_bundle: Option<Vec<u8>>,
    skip_verification: bool,
}

impl TlsTrustPolicy {
    /// System roots, full verification.
    pub fn new() -> Self {
        Self::default()
    }

    /// Trust only the certificates in this PEM bundle.
    pub fn with_ca_bundle(mut self, pem: impl Into<Vec<u8>>) -> Self {
        self.ca_bundle = Some(pem.into());
        self
    }

    /// Disable certificate verification. Never enabled implicitly.
    pub fn danger_skip_verification(mut self, skip: bool) -> Self {
        self.skip_verification = skip;
        self
    }

    pub fn ca_bundle(&self) -> Option<&[u8]> {
        self.ca_bundle.as_deref()
    }

    pub fn skips_verification(&self) -> bool {
        self.skip_verification
    }

    /// Parse the configured bundle into certificates.
    pub fn certificates(&self) -> Result<Vec<Certificate>, TransportError> {
        let Some(pem) = self.ca_bundle.as_deref() else {
            return Ok(Vec::new());
        };

        let certificates = Certificate::from_pem_bundle(pem)
            .map_err(|err| TransportError::Tls(format!("invalid CA bundle: {err}")))?;
        if certificates.is_empty() {
            return Err(TransportError::Tls(
                "CA bundle contains no certificates".into(),
            ));
        }
        Ok(certificates)
    }

    pub fn apply(&self, mut builder: ClientBuilder) -> Result<ClientBuilder, TransportError> {
        let certificates = self.certificates()?;
        if !certificates.is_empty() {
            // A custom pool replaces the system roots rather than extending them.
            builder = builder.tls_built_in_root_certs(false);
            for certificate in certificates {
                builder = builder.add_root_certificate(certificate);
            }
        }

        if self.skip_verification {
            log::warn!("TLS certificate verification is disabled for the portal client");
            builder = builder.danger_accept_invalid_certs(true);
        }

        Ok(builder)
    }
}

impl std::fmt::Debug for TlsTrustPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsTrustPolicy")
            .field("ca_bundle_bytes", &self.ca_bundle.as_ref().map(Vec::len))
            .field("skip_verification", &self.skip_verification)
            .finish()
    }
}
