//! Bearer credential resolution.
//!
//! The HTTP surface authenticates callers with an opaque bearer token that
//! resolves to an organization id. The resolver is a capability so
//! deployments can plug an IdP; the static map covers single-box and test
//! setups and loads from `AIGOS_API_TOKENS` (`token:org,token:org`).

use async_trait::async_trait;
use std::collections::HashMap;

/// Resolve a bearer credential to the organization it belongs to.
#[async_trait]
pub trait OrgResolver: Send + Sync {
    async fn resolve(&self, bearer: &str) -> Option<String>;
}

/// Fixed token → org map.
#[derive(Debug, Default, Clone)]
pub struct StaticTokenMap {
    tokens: HashMap<String, String>,
}

impl StaticTokenMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, org_id: impl Into<String>) -> Self {
        self.tokens.insert(token.into(), org_id.into());
        self
    }

    /// Parse the `token:org[,token:org...]` environment format. Malformed
    /// entries are skipped with a warning rather than refusing to start.
    pub fn from_env_value(raw: &str) -> Self {
        let mut map = Self::new();
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            match entry.split_once(':') {
                Some((token, org)) if !token.is_empty() && !org.is_empty() => {
                    map.tokens.insert(token.to_string(), org.to_string());
                }
                _ => tracing::warn!(entry, "Skipping malformed API token entry"),
            }
        }
        map
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl OrgResolver for StaticTokenMap {
    async fn resolve(&self, bearer: &str) -> Option<String> {
        self.tokens.get(bearer).cloned()
    }
}
