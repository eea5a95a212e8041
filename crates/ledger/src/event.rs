//! Governance event model.
//!
//! Every action a governed agent takes produces a [`GovernanceEvent`]:
//! policy decisions, kill-switch transitions, token exchanges, spawn
//! records. Events are frozen once built; the builder computes the content
//! hash (canonical JSON minus the `hash` field, lexically ordered keys)
//! before handing the event out, and ingestion recomputes it to detect
//! tampering in transit.

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use aigos_identity::canonical::{canonical_json, sha256_prefixed};
use aigos_identity::types::GoldenThread;

/// Current event envelope version.
pub const SPEC_VERSION: &str = "1.0";
/// Current payload schema version.
pub const SCHEMA_VERSION: &str = "1";

/// How urgently consumers must see an event. `Critical` events bypass
/// ingestion rate limits when the exemption is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Criticality {
    Low,
    Normal,
    High,
    Critical,
}

/// A single governance event. Frozen after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernanceEvent {
    /// `evt_<32 hex>`, assigned at build time.
    pub id: String,
    pub spec_version: String,
    pub schema_version: String,
    /// Dotted event type, e.g. `policy.decision`, `killswitch.terminated`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Coarse grouping: `policy`, `killswitch`, `token`, `lifecycle`.
    pub category: String,
    pub criticality: Criticality,
    /// Producing component, e.g. `aigos-bouncer`.
    pub source: String,
    pub org_id: String,
    pub asset_id: String,
    pub produced_at: DateTime<Utc>,
    /// The approval under whose authority the action happened.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub golden_thread: Option<GoldenThread>,
    /// `sha256:<hex>` over the canonical event minus this field.
    pub hash: String,
    pub data: serde_json::Value,
}

impl GovernanceEvent {
    /// Recompute the content hash from the event's current fields.
    pub fn compute_hash(&self) -> String {
        let mut value = serde_json::to_value(self).expect("event serialization");
        if let Some(map) = value.as_object_mut() {
            map.remove("hash");
        }
        sha256_prefixed(canonical_json(&value).as_bytes())
    }

    /// True iff the carried hash matches a fresh recomputation.
    pub fn verify_hash(&self) -> bool {
        self.hash == self.compute_hash()
    }
}

/// Generate a fresh `evt_<32 hex>` identifier.
pub fn event_id() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    let mut hex = String::with_capacity(32);
    for b in bytes {
        hex.push_str(&format!("{:02x}", b));
    }
    format!("evt_{}", hex)
}

/// Builder for governance events. `build` stamps id, timestamps and the
/// content hash, after which the event is treated as immutable.
#[derive(Debug, Clone)]
pub struct EventBuilder {
    event_type: String,
    category: String,
    criticality: Criticality,
    source: String,
    org_id: String,
    asset_id: String,
    golden_thread: Option<GoldenThread>,
    data: serde_json::Value,
}

impl EventBuilder {
    pub fn new(
        event_type: impl Into<String>,
        category: impl Into<String>,
        org_id: impl Into<String>,
        asset_id: impl Into<String>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            category: category.into(),
            criticality: Criticality::Normal,
            source: "aigos".to_string(),
            org_id: org_id.into(),
            asset_id: asset_id.into(),
            golden_thread: None,
            data: serde_json::Value::Null,
        }
    }

    pub fn criticality(mut self, criticality: Criticality) -> Self {
        self.criticality = criticality;
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn golden_thread(mut self, thread: GoldenThread) -> Self {
        self.golden_thread = Some(thread);
        self
    }

    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    /// Freeze the event: assign id and timestamp, compute the hash.
    pub fn build(self) -> GovernanceEvent {
        let mut event = GovernanceEvent {
            id: event_id(),
            spec_version: SPEC_VERSION.to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            event_type: self.event_type,
            category: self.category,
            criticality: self.criticality,
            source: self.source,
            org_id: self.org_id,
            asset_id: self.asset_id,
            produced_at: Utc::now(),
            golden_thread: self.golden_thread,
            hash: String::new(),
            data: self.data,
        };
        event.hash = event.compute_hash();
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event() -> GovernanceEvent {
        EventBuilder::new("policy.decision", "policy", "acme", "acme/support-bot")
            .source("aigos-bouncer")
            .data(json!({"allowed": true, "code": "ALLOWED"}))
            .build()
    }

    #[test]
    fn test_event_id_shape() {
        let id = event_id();
        assert!(id.starts_with("evt_"));
        assert_eq!(id.len(), 4 + 32);
        assert!(id[4..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_built_event_hash_verifies() {
        let e = event();
        assert!(e.hash.starts_with("sha256:"));
        assert!(e.verify_hash());
    }

    #[test]
    fn test_tampered_event_fails_verification() {
        let mut e = event();
        e.data = json!({"allowed": false});
        assert!(!e.verify_hash());
    }

    #[test]
    fn test_hash_roundtrips_through_serialization() {
        let e = event();
        let wire = serde_json::to_string(&e).unwrap();
        let parsed: GovernanceEvent = serde_json::from_str(&wire).unwrap();
        assert!(parsed.verify_hash());
        assert_eq!(parsed.hash, e.hash);
    }

    #[test]
    fn test_wire_field_names() {
        let e = event();
        let value = serde_json::to_value(&e).unwrap();
        let map = value.as_object().unwrap();
        for key in ["specVersion", "schemaVersion", "type", "orgId", "assetId", "producedAt"] {
            assert!(map.contains_key(key), "missing {key}");
        }
    }

    #[test]
    fn test_criticality_ordering() {
        assert!(Criticality::Critical > Criticality::High);
        assert!(Criticality::Normal > Criticality::Low);
    }
}
