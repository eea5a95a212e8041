//! Core identity types.
//!
//! These structs are the wire shapes shared by every AIGOS component:
//! the policy engine evaluates against them, the kill switch targets them,
//! A2A tokens embed them, and the ledger records them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Risk classification of an agent asset.
///
/// Mirrors the four-tier model used by the approval workflow. `Unacceptable`
/// assets can be cataloged but never minted into a running identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Minimal,
    Limited,
    High,
    Unacceptable,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Minimal => write!(f, "minimal"),
            Self::Limited => write!(f, "limited"),
            Self::High => write!(f, "high"),
            Self::Unacceptable => write!(f, "unacceptable"),
        }
    }
}

/// Operating mode of a running agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentMode {
    Normal,
    Sandbox,
    Restricted,
}

/// How a child's capability manifest is derived on spawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityMode {
    /// Numeric caps shrink by 20% per generation.
    Decay,
    /// Child receives the parent manifest unchanged.
    Inherit,
    /// Caller supplies the manifest; it must be subsumed by the parent's.
    Explicit,
}

/// The approval record binding an agent instance to a business authorization.
///
/// `ticket_id`, `approved_by` and `approved_at` are the canonical fields;
/// `hash` and `signature` are carried when upstream systems stamp them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoldenThread {
    /// Ticket or change-request identifier in the approval system.
    pub ticket_id: String,
    /// Email of the approving human.
    pub approved_by: String,
    /// ISO-8601 approval timestamp, kept verbatim as approved.
    pub approved_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl GoldenThread {
    pub fn new(
        ticket_id: impl Into<String>,
        approved_by: impl Into<String>,
        approved_at: impl Into<String>,
    ) -> Self {
        Self {
            ticket_id: ticket_id.into(),
            approved_by: approved_by.into(),
            approved_at: approved_at.into(),
            hash: None,
            signature: None,
        }
    }
}

/// The vector of permissions attached to an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilitiesManifest {
    /// Tool patterns the agent may invoke (`*`, `foo*`, `*bar`, exact).
    pub allowed_tools: Vec<String>,
    /// Tool patterns that are always denied; deny wins over allow.
    pub denied_tools: Vec<String>,
    /// Domain patterns the agent may reach (`*.x.y` also matches `x.y`).
    pub allowed_domains: Vec<String>,
    /// Domain patterns that are always denied.
    pub denied_domains: Vec<String>,
    pub may_spawn_children: bool,
    /// Deepest generation this agent's descendants may reach.
    pub max_child_depth: u32,
    pub capability_mode: CapabilityMode,
    pub max_cost_per_session: f64,
    pub max_cost_per_day: f64,
    pub max_cost_per_month: f64,
    pub max_tokens_per_call: u64,
    pub max_calls_per_minute: u32,
}

impl Default for CapabilitiesManifest {
    fn default() -> Self {
        Self {
            allowed_tools: vec!["*".to_string()],
            denied_tools: Vec::new(),
            allowed_domains: Vec::new(),
            denied_domains: Vec::new(),
            may_spawn_children: false,
            max_child_depth: 0,
            capability_mode: CapabilityMode::Decay,
            max_cost_per_session: 10.0,
            max_cost_per_day: 100.0,
            max_cost_per_month: 1000.0,
            max_tokens_per_call: 100_000,
            max_calls_per_minute: 60,
        }
    }
}

/// Spawn ancestry of an agent instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lineage {
    /// `None` for root agents.
    pub parent_instance_id: Option<Uuid>,
    /// The root of this spawn tree; equals `instance_id` for roots.
    pub root_instance_id: Uuid,
    /// Every ancestor from root to parent, oldest first.
    pub ancestor_chain: Vec<Uuid>,
    /// Always `ancestor_chain.len()`.
    pub generation_depth: u32,
    pub spawned_at: DateTime<Utc>,
}

impl Lineage {
    /// Lineage for a freshly minted root agent.
    pub fn root(instance_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            parent_instance_id: None,
            root_instance_id: instance_id,
            ancestor_chain: Vec::new(),
            generation_depth: 0,
            spawned_at: now,
        }
    }

    /// Lineage for a child of `parent`.
    pub fn child_of(parent: &RuntimeIdentity, now: DateTime<Utc>) -> Self {
        let mut chain = parent.lineage.ancestor_chain.clone();
        chain.push(parent.instance_id);
        Self {
            parent_instance_id: Some(parent.instance_id),
            root_instance_id: parent.lineage.root_instance_id,
            generation_depth: chain.len() as u32,
            ancestor_chain: chain,
            spawned_at: now,
        }
    }
}

/// One live agent instance, cryptographically bound to its approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeIdentity {
    /// Fresh UUID per process, never reused.
    pub instance_id: Uuid,
    pub asset_id: String,
    pub asset_name: String,
    pub asset_version: String,
    pub risk_level: RiskLevel,
    pub mode: AgentMode,
    pub golden_thread: GoldenThread,
    /// `sha256:<64 hex>` over the canonical Golden Thread form.
    pub golden_thread_hash: String,
    /// True iff the hash was recomputed and matched.
    pub verified: bool,
    pub capabilities_manifest: CapabilitiesManifest,
    pub lineage: Lineage,
    pub created_at: DateTime<Utc>,
}

impl RuntimeIdentity {
    /// Organization owning this asset, derived from the asset id prefix
    /// (`org/asset` form) or empty when unscoped.
    pub fn org_id(&self) -> &str {
        self.asset_id.split_once('/').map(|(org, _)| org).unwrap_or("")
    }
}
