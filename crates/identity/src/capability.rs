//! Capability calculus: deriving a child manifest on spawn.
//!
//! Three modes govern what a child may do relative to its parent:
//! - `inherit`: the parent manifest verbatim.
//! - `decay`: numeric caps shrink to 80% (floored for integers); pattern
//!   sets are preserved; spawn rights shrink with remaining depth.
//! - `explicit`: the caller supplies the manifest, which must be strictly
//!   subsumed by the parent's.
//!
//! Depth is always enforced: a spawn that would exceed the parent's
//! `max_child_depth` fails regardless of mode.

use thiserror::Error;

use crate::patterns::Pattern;
use crate::types::{CapabilitiesManifest, CapabilityMode};

/// Numeric decay factor applied per generation in `decay` mode.
pub const DECAY_FACTOR: f64 = 0.8;

/// Spawn-time capability errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CapabilityError {
    /// Code `DEPTH_EXCEEDED`: the child generation would exceed the
    /// parent's depth bound.
    #[error("spawn would reach generation {attempted} but max child depth is {max}")]
    DepthExceeded { attempted: u32, max: u32 },

    /// Code `SPAWN_NOT_ALLOWED`: the parent manifest forbids children.
    #[error("parent manifest does not permit spawning children")]
    SpawnNotAllowed,

    /// Code `INVALID_CAPABILITY`: an explicit manifest escapes the parent.
    #[error("explicit manifest exceeds parent capability: {0}")]
    NotSubsumed(String),

    /// Code `INVALID_CAPABILITY`: explicit mode without a manifest.
    #[error("explicit capability mode requires a caller-supplied manifest")]
    MissingManifest,

    /// Code `INVALID_CAPABILITY`: a pattern failed to compile.
    #[error("invalid pattern in manifest: {0}")]
    InvalidPattern(String),
}

impl CapabilityError {
    /// Machine-readable code surfaced to callers and recorded in events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DepthExceeded { .. } => "DEPTH_EXCEEDED",
            Self::SpawnNotAllowed => "SPAWN_NOT_ALLOWED",
            Self::NotSubsumed(_) | Self::MissingManifest | Self::InvalidPattern(_) => {
                "INVALID_CAPABILITY"
            }
        }
    }
}

/// Compute the manifest for a child spawned at `child_depth`
/// (= parent generation + 1) from `parent`.
///
/// `explicit` must be `Some` iff the effective mode is
/// [`CapabilityMode::Explicit`]; it is ignored otherwise.
pub fn child_manifest(
    parent: &CapabilitiesManifest,
    child_depth: u32,
    mode: CapabilityMode,
    explicit: Option<&CapabilitiesManifest>,
) -> Result<CapabilitiesManifest, CapabilityError> {
    if !parent.may_spawn_children {
        return Err(CapabilityError::SpawnNotAllowed);
    }
    if child_depth > parent.max_child_depth {
        return Err(CapabilityError::DepthExceeded {
            attempted: child_depth,
            max: parent.max_child_depth,
        });
    }

    match mode {
        CapabilityMode::Inherit => Ok(parent.clone()),
        CapabilityMode::Decay => Ok(decayed(parent, child_depth)),
        CapabilityMode::Explicit => {
            let requested = explicit.ok_or(CapabilityError::MissingManifest)?;
            check_subsumed(parent, requested)?;
            Ok(requested.clone())
        }
    }
}

fn decayed(parent: &CapabilitiesManifest, child_depth: u32) -> CapabilitiesManifest {
    CapabilitiesManifest {
        allowed_tools: parent.allowed_tools.clone(),
        denied_tools: parent.denied_tools.clone(),
        allowed_domains: parent.allowed_domains.clone(),
        denied_domains: parent.denied_domains.clone(),
        // A grandchild must still fit under the same depth bound.
        may_spawn_children: parent.max_child_depth > child_depth + 1,
        max_child_depth: parent.max_child_depth,
        capability_mode: parent.capability_mode,
        max_cost_per_session: parent.max_cost_per_session * DECAY_FACTOR,
        max_cost_per_day: parent.max_cost_per_day * DECAY_FACTOR,
        max_cost_per_month: parent.max_cost_per_month * DECAY_FACTOR,
        max_tokens_per_call: (parent.max_tokens_per_call as f64 * DECAY_FACTOR).floor() as u64,
        max_calls_per_minute: (parent.max_calls_per_minute as f64 * DECAY_FACTOR).floor() as u32,
    }
}

/// Strict subsumption: every grant in `child` must already be held by
/// `parent`, every parent denial must survive, and no numeric cap may grow.
fn check_subsumed(
    parent: &CapabilitiesManifest,
    child: &CapabilitiesManifest,
) -> Result<(), CapabilityError> {
    check_patterns_subsumed(&parent.allowed_tools, &child.allowed_tools, false, "allowed_tools")?;
    check_patterns_subsumed(
        &parent.allowed_domains,
        &child.allowed_domains,
        true,
        "allowed_domains",
    )?;
    check_denials_kept(&parent.denied_tools, &child.denied_tools, "denied_tools")?;
    check_denials_kept(&parent.denied_domains, &child.denied_domains, "denied_domains")?;

    if child.max_cost_per_session > parent.max_cost_per_session {
        return Err(CapabilityError::NotSubsumed("max_cost_per_session".into()));
    }
    if child.max_cost_per_day > parent.max_cost_per_day {
        return Err(CapabilityError::NotSubsumed("max_cost_per_day".into()));
    }
    if child.max_cost_per_month > parent.max_cost_per_month {
        return Err(CapabilityError::NotSubsumed("max_cost_per_month".into()));
    }
    if child.max_tokens_per_call > parent.max_tokens_per_call {
        return Err(CapabilityError::NotSubsumed("max_tokens_per_call".into()));
    }
    if child.max_calls_per_minute > parent.max_calls_per_minute {
        return Err(CapabilityError::NotSubsumed("max_calls_per_minute".into()));
    }
    if child.max_child_depth > parent.max_child_depth {
        return Err(CapabilityError::NotSubsumed("max_child_depth".into()));
    }
    if child.may_spawn_children && !parent.may_spawn_children {
        return Err(CapabilityError::NotSubsumed("may_spawn_children".into()));
    }
    Ok(())
}

fn check_patterns_subsumed(
    parent: &[String],
    child: &[String],
    domain: bool,
    field: &str,
) -> Result<(), CapabilityError> {
    let compile = |raw: &String| {
        if domain {
            Pattern::compile_domain(raw)
        } else {
            Pattern::compile_tool(raw)
        }
    };
    let parent_patterns: Vec<Pattern> = parent
        .iter()
        .map(|raw| compile(raw).map_err(|e| CapabilityError::InvalidPattern(e.to_string())))
        .collect::<Result<_, _>>()?;

    for raw in child {
        let child_pattern =
            compile(raw).map_err(|e| CapabilityError::InvalidPattern(e.to_string()))?;
        if !parent_patterns.iter().any(|p| p.subsumes(&child_pattern)) {
            return Err(CapabilityError::NotSubsumed(format!(
                "{field} pattern '{raw}' exceeds parent grants"
            )));
        }
    }
    Ok(())
}

/// Denials may only grow: every parent denial must appear in the child.
fn check_denials_kept(
    parent: &[String],
    child: &[String],
    field: &str,
) -> Result<(), CapabilityError> {
    for denial in parent {
        if !child.contains(denial) {
            return Err(CapabilityError::NotSubsumed(format!(
                "{field} drops parent denial '{denial}'"
            )));
        }
    }
    Ok(())
}
