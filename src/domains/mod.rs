//! Read-only DNS domain listing.
//!
//! The portal does not document the payload of its domain list. The raw JSON
//! is kept as is, and domain names are pulled from the shapes seen so far:
//! a bare array, or an object wrapping one, of strings or of objects with a
//! `domain`/`domain_name`/`name` field.

use serde::Deserialize;
use serde_json::Value;

use crate::client::{PortalClient, PortalError, PortalResult};

pub const DOMAIN_LIST_PATH: &str = "/pfapi/dns/domain-list";

const WRAPPER_KEYS: [&str; 5] = ["data", "domains", "list", "items", "result"];

#[derive(Debug, Clone)]
pub struct DomainListing {
    raw: Value,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DomainEntry {
    Name(String),
    Record {
        #[serde(alias = "domain_name", alias = "name")]
        domain: String,
    },
}

impl DomainListing {
    pub fn from_value(raw: Value) -> Self {
        Self { raw }
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn domain_names(&self) -> Vec<String> {
        let Some(entries) = entries(&self.raw) else {
            return Vec::new();
        };

        entries
            .iter()
            .filter_map(|entry| DomainEntry::deserialize(entry).ok())
            .map(|entry| match entry {
                DomainEntry::Name(name) => name,
                DomainEntry::Record { domain } => domain,
            })
            .collect()
    }
}

fn entries(value: &Value) -> Option<&Vec<Value>> {
    match value {
        Value::Array(items) => Some(items),
        Value::Object(map) => WRAPPER_KEYS
            .iter()
            .filter_map(|key| map.get(*key))
            .find_map(entries),
        _ => None,
    }
}

impl PortalClient {
    /// Fetch the account's DNS domain list.
    pub async fn domain_list(&self) -> PortalResult<DomainListing> {
        let response = self.get(DOMAIN_LIST_PATH).await?;
        if !response.is_success() {
            return Err(PortalError::UnexpectedStatus {
                url: response.url().clone(),
                status: response.status(),
            });
        }

        let raw: Value = response.json()?;
        Ok(DomainListing::from_value(raw))
    }
}
