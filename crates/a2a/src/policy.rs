//! Peer governance policies for the handshake.
//!
//! The inbound policy is the gauntlet a validated caller token must pass
//! before we answer; the outbound policy gates who we call and what we
//! accept back. Both are deny-only lists plus custom hooks; a rejection
//! surfaces as `POLICY_VIOLATION` with the failing rule named.

use async_trait::async_trait;
use std::sync::Arc;

use aigos_identity::patterns::matches_domain;
use aigos_identity::types::{AgentMode, RiskLevel};

use crate::claims::TokenClaims;

/// Custom peer check: `Some(reason)` rejects the peer.
#[async_trait]
pub trait PeerCheck: Send + Sync {
    fn name(&self) -> &str;
    async fn check(&self, claims: &TokenClaims) -> Option<String>;
}

/// One failed policy rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRejection {
    pub rule: String,
    pub reason: String,
}

/// Requirements a calling agent must satisfy.
#[derive(Clone)]
pub struct InboundPolicy {
    pub require_token: bool,
    pub max_risk_level: RiskLevel,
    pub require_kill_switch: bool,
    pub require_verified_golden_thread: bool,
    pub max_generation_depth: Option<u32>,
    pub blocked_organizations: Vec<String>,
    /// Empty trusts every org not explicitly blocked.
    pub trusted_organizations: Vec<String>,
    pub blocked_assets: Vec<String>,
    /// Empty allows every mode.
    pub allowed_modes: Vec<AgentMode>,
    pub custom: Vec<Arc<dyn PeerCheck>>,
}

impl Default for InboundPolicy {
    fn default() -> Self {
        Self {
            require_token: true,
            max_risk_level: RiskLevel::High,
            require_kill_switch: true,
            require_verified_golden_thread: true,
            max_generation_depth: None,
            blocked_organizations: Vec::new(),
            trusted_organizations: Vec::new(),
            blocked_assets: Vec::new(),
            allowed_modes: Vec::new(),
            custom: Vec::new(),
        }
    }
}

impl std::fmt::Debug for InboundPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundPolicy")
            .field("require_token", &self.require_token)
            .field("max_risk_level", &self.max_risk_level)
            .field("custom_checks", &self.custom.len())
            .finish_non_exhaustive()
    }
}

impl InboundPolicy {
    /// Evaluate a validated caller token. First failing rule wins.
    pub async fn evaluate(&self, claims: &TokenClaims) -> Result<(), PolicyRejection> {
        let aigos = &claims.aigos;
        if aigos.identity.risk_level > self.max_risk_level {
            return Err(PolicyRejection {
                rule: "max_risk_level".to_string(),
                reason: format!(
                    "peer risk level {} exceeds {}",
                    aigos.identity.risk_level, self.max_risk_level
                ),
            });
        }
        if self.require_kill_switch && !aigos.control.kill_switch_enabled {
            return Err(PolicyRejection {
                rule: "require_kill_switch".to_string(),
                reason: "peer has no kill switch".to_string(),
            });
        }
        if self.require_verified_golden_thread && !aigos.governance.golden_thread_verified {
            return Err(PolicyRejection {
                rule: "require_verified_golden_thread".to_string(),
                reason: "peer golden thread is unverified".to_string(),
            });
        }
        if let Some(max_depth) = self.max_generation_depth {
            if aigos.lineage.generation_depth > max_depth {
                return Err(PolicyRejection {
                    rule: "max_generation_depth".to_string(),
                    reason: format!(
                        "peer generation {} exceeds {}",
                        aigos.lineage.generation_depth, max_depth
                    ),
                });
            }
        }
        let org = claims.org_id();
        if self.blocked_organizations.iter().any(|b| b == org) {
            return Err(PolicyRejection {
                rule: "blocked_organizations".to_string(),
                reason: format!("organization '{org}' is blocked"),
            });
        }
        if !self.trusted_organizations.is_empty()
            && !self.trusted_organizations.iter().any(|t| t == org)
        {
            return Err(PolicyRejection {
                rule: "trusted_organizations".to_string(),
                reason: format!("organization '{org}' is not in the trusted set"),
            });
        }
        if self
            .blocked_assets
            .iter()
            .any(|b| b == &aigos.identity.asset_id)
        {
            return Err(PolicyRejection {
                rule: "blocked_assets".to_string(),
                reason: format!("asset '{}' is blocked", aigos.identity.asset_id),
            });
        }
        if !self.allowed_modes.is_empty() && !self.allowed_modes.contains(&aigos.identity.mode) {
            return Err(PolicyRejection {
                rule: "allowed_modes".to_string(),
                reason: format!("peer mode {:?} is not permitted", aigos.identity.mode),
            });
        }
        for check in &self.custom {
            if let Some(reason) = check.check(claims).await {
                return Err(PolicyRejection {
                    rule: check.name().to_string(),
                    reason,
                });
            }
        }
        Ok(())
    }
}

/// Requirements on targets we call and on their response tokens.
#[derive(Clone)]
pub struct OutboundPolicy {
    pub include_token: bool,
    pub max_target_risk: RiskLevel,
    pub require_target_kill_switch: bool,
    pub require_target_golden_thread: bool,
    pub blocked_domains: Vec<String>,
    /// Empty allows every domain not explicitly blocked.
    pub allowed_domains: Vec<String>,
    pub blocked_target_assets: Vec<String>,
    pub validate_response_tokens: bool,
    pub custom: Vec<Arc<dyn PeerCheck>>,
}

impl Default for OutboundPolicy {
    fn default() -> Self {
        Self {
            include_token: true,
            max_target_risk: RiskLevel::High,
            require_target_kill_switch: true,
            require_target_golden_thread: true,
            blocked_domains: Vec::new(),
            allowed_domains: Vec::new(),
            blocked_target_assets: Vec::new(),
            validate_response_tokens: true,
            custom: Vec::new(),
        }
    }
}

impl std::fmt::Debug for OutboundPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundPolicy")
            .field("include_token", &self.include_token)
            .field("validate_response_tokens", &self.validate_response_tokens)
            .field("custom_checks", &self.custom.len())
            .finish_non_exhaustive()
    }
}

impl OutboundPolicy {
    /// Pre-flight gate on the target domain, before any request is sent.
    pub fn pre_flight(&self, domain: &str) -> Result<(), PolicyRejection> {
        if matches_domain(&self.blocked_domains, domain) {
            return Err(PolicyRejection {
                rule: "blocked_domains".to_string(),
                reason: format!("domain '{domain}' is blocked"),
            });
        }
        if !self.allowed_domains.is_empty() && !matches_domain(&self.allowed_domains, domain) {
            return Err(PolicyRejection {
                rule: "allowed_domains".to_string(),
                reason: format!("domain '{domain}' is not in the allowed set"),
            });
        }
        Ok(())
    }

    /// Evaluate a validated response token from the target.
    pub async fn evaluate_response(&self, claims: &TokenClaims) -> Result<(), PolicyRejection> {
        let aigos = &claims.aigos;
        if aigos.identity.risk_level > self.max_target_risk {
            return Err(PolicyRejection {
                rule: "max_target_risk".to_string(),
                reason: format!(
                    "target risk level {} exceeds {}",
                    aigos.identity.risk_level, self.max_target_risk
                ),
            });
        }
        if self.require_target_kill_switch && !aigos.control.kill_switch_enabled {
            return Err(PolicyRejection {
                rule: "require_target_kill_switch".to_string(),
                reason: "target has no kill switch".to_string(),
            });
        }
        if self.require_target_golden_thread && !aigos.governance.golden_thread_verified {
            return Err(PolicyRejection {
                rule: "require_target_golden_thread".to_string(),
                reason: "target golden thread is unverified".to_string(),
            });
        }
        if self
            .blocked_target_assets
            .iter()
            .any(|b| b == &aigos.identity.asset_id)
        {
            return Err(PolicyRejection {
                rule: "blocked_target_assets".to_string(),
                reason: format!("target asset '{}' is blocked", aigos.identity.asset_id),
            });
        }
        for check in &self.custom {
            if let Some(reason) = check.check(claims).await {
                return Err(PolicyRejection {
                    rule: check.name().to_string(),
                    reason,
                });
            }
        }
        Ok(())
    }
}
