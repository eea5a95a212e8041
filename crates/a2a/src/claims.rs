//! Governance token claims.
//!
//! A governance token is a JWT whose `aigos` claim block carries five
//! facets of the caller: who it is (identity), under whose authority it
//! runs (governance), whether it is currently controllable (control), what
//! it may do (capabilities, with a binding hash), and where it sits in its
//! spawn tree (lineage).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use aigos_identity::canonical::sha256_prefixed;
use aigos_identity::types::{AgentMode, CapabilitiesManifest, RiskLevel, RuntimeIdentity};

/// Required JWT header `typ`.
pub const TOKEN_TYP: &str = "AIGOS-GOV+jwt";
/// Wire protocol version carried in `X-AIGOS-Protocol-Version`.
pub const PROTOCOL_VERSION: &str = "1.0";
/// Default token lifetime.
pub const DEFAULT_TTL_SECS: i64 = 300;

/// Who the agent is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityClaims {
    pub asset_id: String,
    pub asset_name: String,
    pub asset_version: String,
    pub risk_level: RiskLevel,
    pub mode: AgentMode,
}

/// Under whose authority it runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceClaims {
    pub golden_thread_verified: bool,
    pub golden_thread_hash: String,
    pub ticket_id: String,
    pub approved_by: String,
}

/// Live control posture at mint time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ControlClaims {
    /// The agent listens on a kill-switch channel.
    pub kill_switch_enabled: bool,
    pub paused: bool,
    pub termination_pending: bool,
}

/// Snapshot of the issuer's control plane, supplied at generation.
pub type ControlStatus = ControlClaims;

impl Default for ControlClaims {
    fn default() -> Self {
        Self {
            kill_switch_enabled: true,
            paused: false,
            termination_pending: false,
        }
    }
}

/// What the agent may do, bound by hash to the full manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityClaims {
    pub allowed_tools: Vec<String>,
    pub denied_tools: Vec<String>,
    pub allowed_domains: Vec<String>,
    pub denied_domains: Vec<String>,
    pub max_cost_per_session: f64,
    pub max_cost_per_day: f64,
    pub may_spawn_children: bool,
    pub max_child_depth: u32,
    /// `sha256:` hash over the canonical capability form.
    pub hash: String,
}

/// Where the agent sits in its spawn tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineageClaims {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_instance_id: Option<Uuid>,
    pub root_instance_id: Uuid,
    pub generation_depth: u32,
}

/// The `aigos` claim block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AigosClaims {
    pub identity: IdentityClaims,
    pub governance: GovernanceClaims,
    pub control: ControlClaims,
    pub capabilities: CapabilityClaims,
    pub lineage: LineageClaims,
}

/// Full token payload: registered claims plus the `aigos` block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    pub iss: String,
    /// The caller's `instance_id`.
    pub sub: Uuid,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub nbf: i64,
    pub jti: String,
    pub aigos: AigosClaims,
}

impl TokenClaims {
    /// Organization of the peer, from the scoped asset id.
    pub fn org_id(&self) -> &str {
        self.aigos
            .identity
            .asset_id
            .split_once('/')
            .map(|(org, _)| org)
            .unwrap_or("")
    }
}

/// Serialization shim pinning the normative capability-hash key order.
#[derive(Serialize)]
struct CanonicalCapabilities<'a> {
    allowed_tools: Vec<&'a str>,
    denied_tools: Vec<&'a str>,
    allowed_domains: Vec<&'a str>,
    denied_domains: Vec<&'a str>,
    max_cost_per_session: f64,
    max_cost_per_day: f64,
    may_spawn_children: bool,
    max_child_depth: u32,
}

fn sorted(values: &[String]) -> Vec<&str> {
    let mut refs: Vec<&str> = values.iter().map(String::as_str).collect();
    refs.sort_unstable();
    refs
}

/// `sha256:` hash over the canonical capability form: the fixed key order
/// above, pattern lists sorted.
pub fn capability_hash(manifest: &CapabilitiesManifest) -> String {
    let canonical = serde_json::to_string(&CanonicalCapabilities {
        allowed_tools: sorted(&manifest.allowed_tools),
        denied_tools: sorted(&manifest.denied_tools),
        allowed_domains: sorted(&manifest.allowed_domains),
        denied_domains: sorted(&manifest.denied_domains),
        max_cost_per_session: manifest.max_cost_per_session,
        max_cost_per_day: manifest.max_cost_per_day,
        may_spawn_children: manifest.may_spawn_children,
        max_child_depth: manifest.max_child_depth,
    })
    .expect("capability serialization");
    sha256_prefixed(canonical.as_bytes())
}

/// Build the `aigos` block from an identity and its control posture.
pub fn aigos_claims(identity: &RuntimeIdentity, control: ControlStatus) -> AigosClaims {
    AigosClaims {
        identity: IdentityClaims {
            asset_id: identity.asset_id.clone(),
            asset_name: identity.asset_name.clone(),
            asset_version: identity.asset_version.clone(),
            risk_level: identity.risk_level,
            mode: identity.mode,
        },
        governance: GovernanceClaims {
            golden_thread_verified: identity.verified,
            golden_thread_hash: identity.golden_thread_hash.clone(),
            ticket_id: identity.golden_thread.ticket_id.clone(),
            approved_by: identity.golden_thread.approved_by.clone(),
        },
        control,
        capabilities: CapabilityClaims {
            allowed_tools: identity.capabilities_manifest.allowed_tools.clone(),
            denied_tools: identity.capabilities_manifest.denied_tools.clone(),
            allowed_domains: identity.capabilities_manifest.allowed_domains.clone(),
            denied_domains: identity.capabilities_manifest.denied_domains.clone(),
            max_cost_per_session: identity.capabilities_manifest.max_cost_per_session,
            max_cost_per_day: identity.capabilities_manifest.max_cost_per_day,
            may_spawn_children: identity.capabilities_manifest.may_spawn_children,
            max_child_depth: identity.capabilities_manifest.max_child_depth,
            hash: capability_hash(&identity.capabilities_manifest),
        },
        lineage: LineageClaims {
            parent_instance_id: identity.lineage.parent_instance_id,
            root_instance_id: identity.lineage.root_instance_id,
            generation_depth: identity.lineage.generation_depth,
        },
    }
}
