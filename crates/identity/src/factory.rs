//! Identity factory: mint and verify runtime identities.
//!
//! `create` turns a cataloged asset record plus optional capability
//! overrides into a [`RuntimeIdentity`] whose Golden Thread hash is computed
//! at mint time. `spawn_child` derives a descendant identity under the
//! capability calculus. `verify` is a pure function over an identity.

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use crate::capability::{child_manifest, CapabilityError};
use crate::golden_thread::{compute_golden_thread_hash, verify_golden_thread};
use crate::types::{
    AgentMode, CapabilitiesManifest, CapabilityMode, GoldenThread, Lineage, RiskLevel,
    RuntimeIdentity,
};

/// A cataloged agent asset, as the approval workflow records it.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AssetRecord {
    /// `org/asset` scoped identifier.
    pub asset_id: String,
    pub name: String,
    pub version: String,
    pub risk_level: RiskLevel,
    /// The approving record; absent for assets still in review.
    pub approval: Option<GoldenThread>,
}

/// Optional per-mint adjustments to the risk-level default manifest.
#[derive(Debug, Clone, Default)]
pub struct CapabilityOverrides {
    pub allowed_tools: Option<Vec<String>>,
    pub denied_tools: Option<Vec<String>>,
    pub allowed_domains: Option<Vec<String>>,
    pub denied_domains: Option<Vec<String>>,
    pub may_spawn_children: Option<bool>,
    pub max_child_depth: Option<u32>,
    pub capability_mode: Option<CapabilityMode>,
    pub max_cost_per_session: Option<f64>,
    pub max_cost_per_day: Option<f64>,
    pub max_cost_per_month: Option<f64>,
    pub max_tokens_per_call: Option<u64>,
    pub max_calls_per_minute: Option<u32>,
    pub mode: Option<AgentMode>,
}

/// Identity minting and verification errors.
#[derive(Debug, Clone, Error)]
pub enum IdentityError {
    /// Code `INVALID_ASSET`.
    #[error("asset '{0}' has no approving record")]
    InvalidAsset(String),

    /// Code `INVALID_ASSET`: unacceptable-risk assets are never minted.
    #[error("asset '{0}' is classified unacceptable and cannot run")]
    UnacceptableRisk(String),

    /// Code `INVALID_CAPABILITY`.
    #[error("capability override violates {risk} risk caps: {detail}")]
    InvalidCapability { risk: RiskLevel, detail: String },

    /// Spawn-time capability failures, forwarded with their own codes.
    #[error(transparent)]
    Capability(#[from] CapabilityError),
}

impl IdentityError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidAsset(_) | Self::UnacceptableRisk(_) => "INVALID_ASSET",
            Self::InvalidCapability { .. } => "INVALID_CAPABILITY",
            Self::Capability(inner) => inner.code(),
        }
    }
}

/// Result of verifying an identity. Pure data; no I/O happened.
#[derive(Debug, Clone, serde::Serialize)]
pub struct VerificationReport {
    pub verified: bool,
    pub errors: Vec<String>,
}

/// Ceilings a manifest may not exceed for a given risk level.
#[derive(Debug, Clone, Copy)]
struct RiskCaps {
    max_cost_per_session: f64,
    max_cost_per_day: f64,
    max_child_depth: u32,
}

fn risk_caps(risk: RiskLevel) -> Option<RiskCaps> {
    match risk {
        RiskLevel::Minimal => Some(RiskCaps {
            max_cost_per_session: 1_000.0,
            max_cost_per_day: 10_000.0,
            max_child_depth: 5,
        }),
        RiskLevel::Limited => Some(RiskCaps {
            max_cost_per_session: 500.0,
            max_cost_per_day: 5_000.0,
            max_child_depth: 4,
        }),
        RiskLevel::High => Some(RiskCaps {
            max_cost_per_session: 100.0,
            max_cost_per_day: 1_000.0,
            max_child_depth: 2,
        }),
        RiskLevel::Unacceptable => None,
    }
}

/// Mints and verifies runtime identities.
#[derive(Debug, Default)]
pub struct IdentityFactory;

impl IdentityFactory {
    pub fn new() -> Self {
        Self
    }

    /// Mint a root identity from an asset record.
    pub fn create(
        &self,
        asset: &AssetRecord,
        overrides: Option<&CapabilityOverrides>,
    ) -> Result<RuntimeIdentity, IdentityError> {
        let caps = risk_caps(asset.risk_level)
            .ok_or_else(|| IdentityError::UnacceptableRisk(asset.asset_id.clone()))?;
        let golden_thread = asset
            .approval
            .clone()
            .ok_or_else(|| IdentityError::InvalidAsset(asset.asset_id.clone()))?;

        let mut manifest = default_manifest(asset.risk_level);
        let mut mode = AgentMode::Normal;
        if let Some(ov) = overrides {
            apply_overrides(&mut manifest, &mut mode, ov);
            validate_against_caps(&manifest, asset.risk_level, caps)?;
        }

        let now = Utc::now();
        let instance_id = Uuid::new_v4();
        let golden_thread_hash = compute_golden_thread_hash(&golden_thread);

        let identity = RuntimeIdentity {
            instance_id,
            asset_id: asset.asset_id.clone(),
            asset_name: asset.name.clone(),
            asset_version: asset.version.clone(),
            risk_level: asset.risk_level,
            mode,
            golden_thread,
            golden_thread_hash,
            verified: true,
            capabilities_manifest: manifest,
            lineage: Lineage::root(instance_id, now),
            created_at: now,
        };

        tracing::info!(
            instance_id = %identity.instance_id,
            asset_id = %identity.asset_id,
            risk_level = %identity.risk_level,
            "Runtime identity minted"
        );
        Ok(identity)
    }

    /// Spawn a child identity under the parent's capability mode (or an
    /// override), enforcing depth and subsumption.
    pub fn spawn_child(
        &self,
        parent: &RuntimeIdentity,
        mode: Option<CapabilityMode>,
        explicit: Option<&CapabilitiesManifest>,
    ) -> Result<RuntimeIdentity, IdentityError> {
        let effective_mode = mode.unwrap_or(parent.capabilities_manifest.capability_mode);
        let child_depth = parent.lineage.generation_depth + 1;
        let manifest = child_manifest(
            &parent.capabilities_manifest,
            child_depth,
            effective_mode,
            explicit,
        )?;

        let now = Utc::now();
        let instance_id = Uuid::new_v4();
        let child = RuntimeIdentity {
            instance_id,
            asset_id: parent.asset_id.clone(),
            asset_name: parent.asset_name.clone(),
            asset_version: parent.asset_version.clone(),
            risk_level: parent.risk_level,
            mode: parent.mode,
            // The same approval authorizes the whole spawn tree.
            golden_thread: parent.golden_thread.clone(),
            golden_thread_hash: parent.golden_thread_hash.clone(),
            verified: verify_golden_thread(&parent.golden_thread, &parent.golden_thread_hash),
            capabilities_manifest: manifest,
            lineage: Lineage::child_of(parent, now),
            created_at: now,
        };

        tracing::info!(
            instance_id = %child.instance_id,
            parent_instance_id = %parent.instance_id,
            generation_depth = child.lineage.generation_depth,
            "Child identity spawned"
        );
        Ok(child)
    }

    /// Verify an identity: Golden Thread hash plus lineage invariants.
    /// Pure function; no I/O.
    pub fn verify(&self, identity: &RuntimeIdentity) -> VerificationReport {
        let mut errors = Vec::new();

        if !verify_golden_thread(&identity.golden_thread, &identity.golden_thread_hash) {
            errors.push("golden thread hash does not match canonical recomputation".to_string());
        }

        let lineage = &identity.lineage;
        if lineage.generation_depth as usize != lineage.ancestor_chain.len() {
            errors.push(format!(
                "generation depth {} does not equal ancestor chain length {}",
                lineage.generation_depth,
                lineage.ancestor_chain.len()
            ));
        }
        if lineage.parent_instance_id.is_none() {
            if lineage.generation_depth != 0 {
                errors.push("root identity with nonzero generation depth".to_string());
            }
            if lineage.root_instance_id != identity.instance_id {
                errors.push("root identity whose root id is not itself".to_string());
            }
        } else if lineage.ancestor_chain.last() != lineage.parent_instance_id.as_ref() {
            errors.push("ancestor chain does not end at parent".to_string());
        }

        VerificationReport {
            verified: errors.is_empty(),
            errors,
        }
    }
}

fn default_manifest(risk: RiskLevel) -> CapabilitiesManifest {
    let base = CapabilitiesManifest::default();
    match risk {
        RiskLevel::Minimal => CapabilitiesManifest {
            may_spawn_children: true,
            max_child_depth: 3,
            max_cost_per_session: 100.0,
            max_cost_per_day: 1_000.0,
            max_cost_per_month: 10_000.0,
            ..base
        },
        RiskLevel::Limited => CapabilitiesManifest {
            may_spawn_children: true,
            max_child_depth: 2,
            max_cost_per_session: 50.0,
            max_cost_per_day: 500.0,
            max_cost_per_month: 5_000.0,
            ..base
        },
        RiskLevel::High => CapabilitiesManifest {
            denied_tools: vec!["admin:*".to_string()],
            max_cost_per_session: 10.0,
            max_cost_per_day: 100.0,
            max_cost_per_month: 1_000.0,
            ..base
        },
        RiskLevel::Unacceptable => base,
    }
}

fn apply_overrides(
    manifest: &mut CapabilitiesManifest,
    mode: &mut AgentMode,
    ov: &CapabilityOverrides,
) {
    if let Some(v) = &ov.allowed_tools {
        manifest.allowed_tools = v.clone();
    }
    if let Some(v) = &ov.denied_tools {
        manifest.denied_tools = v.clone();
    }
    if let Some(v) = &ov.allowed_domains {
        manifest.allowed_domains = v.clone();
    }
    if let Some(v) = &ov.denied_domains {
        manifest.denied_domains = v.clone();
    }
    if let Some(v) = ov.may_spawn_children {
        manifest.may_spawn_children = v;
    }
    if let Some(v) = ov.max_child_depth {
        manifest.max_child_depth = v;
    }
    if let Some(v) = ov.capability_mode {
        manifest.capability_mode = v;
    }
    if let Some(v) = ov.max_cost_per_session {
        manifest.max_cost_per_session = v;
    }
    if let Some(v) = ov.max_cost_per_day {
        manifest.max_cost_per_day = v;
    }
    if let Some(v) = ov.max_cost_per_month {
        manifest.max_cost_per_month = v;
    }
    if let Some(v) = ov.max_tokens_per_call {
        manifest.max_tokens_per_call = v;
    }
    if let Some(v) = ov.max_calls_per_minute {
        manifest.max_calls_per_minute = v;
    }
    if let Some(v) = ov.mode {
        *mode = v;
    }
}

fn validate_against_caps(
    manifest: &CapabilitiesManifest,
    risk: RiskLevel,
    caps: RiskCaps,
) -> Result<(), IdentityError> {
    if manifest.max_cost_per_session > caps.max_cost_per_session {
        return Err(IdentityError::InvalidCapability {
            risk,
            detail: format!(
                "max_cost_per_session {} exceeds cap {}",
                manifest.max_cost_per_session, caps.max_cost_per_session
            ),
        });
    }
    if manifest.max_cost_per_day > caps.max_cost_per_day {
        return Err(IdentityError::InvalidCapability {
            risk,
            detail: format!(
                "max_cost_per_day {} exceeds cap {}",
                manifest.max_cost_per_day, caps.max_cost_per_day
            ),
        });
    }
    if manifest.max_child_depth > caps.max_child_depth {
        return Err(IdentityError::InvalidCapability {
            risk,
            detail: format!(
                "max_child_depth {} exceeds cap {}",
                manifest.max_child_depth, caps.max_child_depth
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(risk: RiskLevel) -> AssetRecord {
        AssetRecord {
            asset_id: "acme/support-bot".to_string(),
            name: "Support Bot".to_string(),
            version: "2.1.0".to_string(),
            risk_level: risk,
            approval: Some(GoldenThread::new(
                "CHG-1042",
                "ciso@acme.example",
                "2026-02-01T08:00:00Z",
            )),
        }
    }

    #[test]
    fn test_create_minted_verified() {
        let factory = IdentityFactory::new();
        let identity = factory.create(&asset(RiskLevel::Limited), None).unwrap();
        assert!(identity.verified);
        assert_eq!(identity.lineage.generation_depth, 0);
        assert_eq!(identity.lineage.root_instance_id, identity.instance_id);
        assert!(identity.golden_thread_hash.starts_with("sha256:"));
        assert_eq!(identity.org_id(), "acme");
    }

    #[test]
    fn test_create_without_approval_fails() {
        let factory = IdentityFactory::new();
        let mut record = asset(RiskLevel::Minimal);
        record.approval = None;
        let err = factory.create(&record, None).unwrap_err();
        assert_eq!(err.code(), "INVALID_ASSET");
    }

    #[test]
    fn test_create_unacceptable_risk_fails() {
        let factory = IdentityFactory::new();
        let err = factory.create(&asset(RiskLevel::Unacceptable), None).unwrap_err();
        assert_eq!(err.code(), "INVALID_ASSET");
    }

    #[test]
    fn test_override_beyond_risk_caps_fails() {
        let factory = IdentityFactory::new();
        let overrides = CapabilityOverrides {
            max_cost_per_session: Some(9_999.0),
            ..Default::default()
        };
        let err = factory
            .create(&asset(RiskLevel::High), Some(&overrides))
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_CAPABILITY");
    }

    #[test]
    fn test_spawn_child_lineage() {
        let factory = IdentityFactory::new();
        let parent = factory.create(&asset(RiskLevel::Minimal), None).unwrap();
        let child = factory.spawn_child(&parent, None, None).unwrap();

        assert_eq!(child.lineage.parent_instance_id, Some(parent.instance_id));
        assert_eq!(child.lineage.root_instance_id, parent.instance_id);
        assert_eq!(child.lineage.generation_depth, 1);
        assert_eq!(child.lineage.ancestor_chain, vec![parent.instance_id]);
        assert_eq!(child.golden_thread_hash, parent.golden_thread_hash);
    }

    #[test]
    fn test_spawn_decay_scenario() {
        // Parent caps 100/depth 3/decay: child session cap 80, still spawns.
        let factory = IdentityFactory::new();
        let overrides = CapabilityOverrides {
            max_cost_per_session: Some(100.0),
            max_child_depth: Some(3),
            capability_mode: Some(CapabilityMode::Decay),
            may_spawn_children: Some(true),
            ..Default::default()
        };
        let parent = factory
            .create(&asset(RiskLevel::Minimal), Some(&overrides))
            .unwrap();
        let child = factory.spawn_child(&parent, None, None).unwrap();

        assert_eq!(child.capabilities_manifest.max_cost_per_session, 80.0);
        assert_eq!(child.capabilities_manifest.max_child_depth, 3);
        assert_eq!(child.lineage.generation_depth, 1);
        assert!(child.capabilities_manifest.may_spawn_children);
    }

    #[test]
    fn test_spawn_at_depth_bound_fails() {
        let factory = IdentityFactory::new();
        let overrides = CapabilityOverrides {
            max_child_depth: Some(3),
            may_spawn_children: Some(true),
            ..Default::default()
        };
        let mut identity = factory
            .create(&asset(RiskLevel::Minimal), Some(&overrides))
            .unwrap();
        for _ in 0..3 {
            identity = factory
                .spawn_child(&identity, Some(CapabilityMode::Inherit), None)
                .unwrap();
        }
        assert_eq!(identity.lineage.generation_depth, 3);
        let err = factory
            .spawn_child(&identity, Some(CapabilityMode::Inherit), None)
            .unwrap_err();
        assert_eq!(err.code(), "DEPTH_EXCEEDED");
    }

    #[test]
    fn test_verify_detects_tampered_thread() {
        let factory = IdentityFactory::new();
        let mut identity = factory.create(&asset(RiskLevel::Limited), None).unwrap();
        assert!(factory.verify(&identity).verified);

        identity.golden_thread.ticket_id = "CHG-9999".to_string();
        let report = factory.verify(&identity);
        assert!(!report.verified);
        assert!(!report.errors.is_empty());
    }

    #[test]
    fn test_verify_detects_broken_lineage() {
        let factory = IdentityFactory::new();
        let mut identity = factory.create(&asset(RiskLevel::Limited), None).unwrap();
        identity.lineage.generation_depth = 2;
        let report = factory.verify(&identity);
        assert!(!report.verified);
    }
}
