//! Kill-switch command payload and validation codes.
//!
//! Commands arrive over any channel as the same JSON payload. The signed
//! byte string is the canonical JSON of the command minus `signature`, so
//! every channel and every implementing language agrees on what was signed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use aigos_identity::canonical::canonical_json;

/// Remote control verbs.
///
/// The first three act on one agent (or one asset/org scope). The
/// emergency pair flips the receiver's global kill flag: shutdown denies
/// every agent behind this receiver until an explicit lift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandType {
    Terminate,
    Pause,
    Resume,
    EmergencyShutdown,
    LiftEmergency,
}

impl std::fmt::Display for CommandType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Terminate => write!(f, "TERMINATE"),
            Self::Pause => write!(f, "PAUSE"),
            Self::Resume => write!(f, "RESUME"),
            Self::EmergencyShutdown => write!(f, "EMERGENCY_SHUTDOWN"),
            Self::LiftEmergency => write!(f, "LIFT_EMERGENCY"),
        }
    }
}

/// A signed remote command. Targeting fields are optional; an untargeted
/// command applies to every receiver that validates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KillSwitchCommand {
    pub command_id: String,
    #[serde(rename = "type")]
    pub command_type: CommandType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    pub issued_by: String,
    /// Trusted-key identifier the signature verifies against.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    /// Base64 signature over [`signing_bytes`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl KillSwitchCommand {
    pub fn new(command_type: CommandType, reason: impl Into<String>, issued_by: impl Into<String>) -> Self {
        Self {
            command_id: Uuid::new_v4().to_string(),
            command_type,
            instance_id: None,
            asset_id: None,
            organization: None,
            timestamp: Utc::now(),
            reason: reason.into(),
            issued_by: issued_by.into(),
            kid: None,
            signature: None,
        }
    }

    pub fn targeting_instance(mut self, instance_id: Uuid) -> Self {
        self.instance_id = Some(instance_id);
        self
    }

    pub fn targeting_asset(mut self, asset_id: impl Into<String>) -> Self {
        self.asset_id = Some(asset_id.into());
        self
    }

    pub fn targeting_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    /// Derive the cascaded command applied to one child: the parent's verbs
    /// and authority, a traceable id, and a reason naming the parent.
    pub fn derive_for_child(&self, child_instance_id: Uuid) -> Self {
        let short: String = child_instance_id.simple().to_string().chars().take(8).collect();
        Self {
            command_id: format!("{}-child-{}", self.command_id, short),
            command_type: self.command_type,
            instance_id: Some(child_instance_id),
            asset_id: None,
            organization: None,
            timestamp: Utc::now(),
            reason: format!("Cascaded from parent: {}", self.reason),
            issued_by: self.issued_by.clone(),
            kid: None,
            // Cascaded commands are internal; the parent's signature was
            // already verified at the boundary.
            signature: None,
        }
    }
}

/// The canonical byte string a command's signature covers: canonical JSON
/// of the command minus `signature`.
pub fn signing_bytes(command: &KillSwitchCommand) -> Vec<u8> {
    let mut value = serde_json::to_value(command).expect("command serialization");
    if let Some(map) = value.as_object_mut() {
        map.remove("signature");
    }
    canonical_json(&value).into_bytes()
}

/// Command rejection reasons, in validation order. Each maps to a distinct
/// machine code and a `killswitch.validation_failed` event.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandRejection {
    #[error("command payload failed schema validation: {0}")]
    SchemaInvalid(String),
    #[error("command timestamp outside clock-skew tolerance")]
    ClockSkew,
    #[error("command carries no signature but verification is required")]
    SignatureMissing,
    #[error("signing key '{0}' is not trusted")]
    KeyNotFound(String),
    #[error("command signature failed verification")]
    SignatureInvalid,
    #[error("command id was already processed")]
    Replay,
    #[error("command does not target this agent")]
    TargetMismatch,
}

impl CommandRejection {
    pub fn code(&self) -> &'static str {
        match self {
            Self::SchemaInvalid(_) => "SCHEMA_INVALID",
            Self::ClockSkew => "CLOCK_SKEW",
            Self::SignatureMissing => "SIGNATURE_MISSING",
            Self::KeyNotFound(_) => "KEY_NOT_FOUND",
            Self::SignatureInvalid => "SIGNATURE_INVALID",
            Self::Replay => "REPLAY",
            Self::TargetMismatch => "TARGET_MISMATCH",
        }
    }
}
