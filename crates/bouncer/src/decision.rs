//! Decision types returned by the policy engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The stage that produced a denial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    KillSwitch,
    Capability,
    ResourceDeny,
    ResourceAllow,
    Budget,
    Schedule,
    Custom,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::KillSwitch => "KILL_SWITCH",
            Self::Capability => "CAPABILITY",
            Self::ResourceDeny => "RESOURCE_DENY",
            Self::ResourceAllow => "RESOURCE_ALLOW",
            Self::Budget => "BUDGET",
            Self::Schedule => "SCHEDULE",
            Self::Custom => "CUSTOM",
        };
        write!(f, "{name}")
    }
}

/// Machine-readable decision codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionCode {
    Allowed,
    Terminated,
    Paused,
    CapabilityDenied,
    ResourceDenied,
    ResourceNotAllowed,
    BudgetExceeded,
    RateExceeded,
    ScheduleDenied,
    CustomDenied,
}

impl DecisionCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allowed => "ALLOWED",
            Self::Terminated => "TERMINATED",
            Self::Paused => "PAUSED",
            Self::CapabilityDenied => "CAPABILITY_DENIED",
            Self::ResourceDenied => "RESOURCE_DENIED",
            Self::ResourceNotAllowed => "RESOURCE_NOT_ALLOWED",
            Self::BudgetExceeded => "BUDGET_EXCEEDED",
            Self::RateExceeded => "RATE_EXCEEDED",
            Self::ScheduleDenied => "SCHEDULE_DENIED",
            Self::CustomDenied => "CUSTOM_DENIED",
        }
    }
}

/// The answer to "may this agent perform this action on this resource now".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    pub reason: String,
    pub code: DecisionCode,
    pub checked_at: DateTime<Utc>,
    pub duration_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denied_by: Option<Stage>,
    /// Set when the engine runs in dry-run mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,
    /// In dry-run mode: the decision that enforcement would have made.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub would_deny: Option<bool>,
}

impl Decision {
    pub fn allow(reason: impl Into<String>, duration_ms: f64) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
            code: DecisionCode::Allowed,
            checked_at: Utc::now(),
            duration_ms,
            denied_by: None,
            dry_run: None,
            would_deny: None,
        }
    }

    pub fn deny(
        code: DecisionCode,
        stage: Stage,
        reason: impl Into<String>,
        duration_ms: f64,
    ) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            code,
            checked_at: Utc::now(),
            duration_ms,
            denied_by: Some(stage),
            dry_run: None,
            would_deny: None,
        }
    }

    /// Dry-run rewrite: the denial stands in the record but the call is let
    /// through, flagged.
    pub fn into_dry_run(mut self) -> Self {
        if !self.allowed {
            self.allowed = true;
            self.would_deny = Some(true);
        } else {
            self.would_deny = Some(false);
        }
        self.dry_run = Some(true);
        self
    }
}
