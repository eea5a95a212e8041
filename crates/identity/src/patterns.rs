//! Tool and domain pattern matching.
//!
//! Capability manifests express permissions as small glob patterns:
//! `*` (anything), `foo*` (prefix), `*bar` (suffix), or an exact string.
//! Domain patterns additionally support `*.x.y`, which matches `x.y` itself
//! and any subdomain. Interior wildcards are rejected at compile time so a
//! malformed manifest fails at load, never mid-decision.

use thiserror::Error;

/// Pattern compilation errors. Fatal at manifest load time.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PatternError {
    #[error("empty pattern")]
    Empty,
    #[error("interior wildcard in pattern '{0}'")]
    InteriorWildcard(String),
}

/// A compiled capability pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Pattern {
    /// `*`: matches everything.
    Any,
    /// `foo*`
    Prefix(String),
    /// `*bar`
    Suffix(String),
    /// Exact string match.
    Exact(String),
    /// `*.x.y`: matches `x.y` and any subdomain of it.
    DomainWildcard(String),
}

impl Pattern {
    /// Compile a tool pattern.
    pub fn compile_tool(raw: &str) -> Result<Self, PatternError> {
        Self::compile(raw, false)
    }

    /// Compile a domain pattern. `*.x.y` becomes a domain wildcard.
    pub fn compile_domain(raw: &str) -> Result<Self, PatternError> {
        Self::compile(raw, true)
    }

    fn compile(raw: &str, domain: bool) -> Result<Self, PatternError> {
        if raw.is_empty() {
            return Err(PatternError::Empty);
        }
        if raw == "*" {
            return Ok(Self::Any);
        }
        if domain {
            if let Some(base) = raw.strip_prefix("*.") {
                if base.contains('*') {
                    return Err(PatternError::InteriorWildcard(raw.to_string()));
                }
                return Ok(Self::DomainWildcard(base.to_string()));
            }
        }
        if let Some(prefix) = raw.strip_suffix('*') {
            if prefix.contains('*') {
                return Err(PatternError::InteriorWildcard(raw.to_string()));
            }
            return Ok(Self::Prefix(prefix.to_string()));
        }
        if let Some(suffix) = raw.strip_prefix('*') {
            if suffix.contains('*') {
                return Err(PatternError::InteriorWildcard(raw.to_string()));
            }
            return Ok(Self::Suffix(suffix.to_string()));
        }
        if raw.contains('*') {
            return Err(PatternError::InteriorWildcard(raw.to_string()));
        }
        Ok(Self::Exact(raw.to_string()))
    }

    /// Does `value` match this pattern?
    pub fn matches(&self, value: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Prefix(p) => value.starts_with(p.as_str()),
            Self::Suffix(s) => value.ends_with(s.as_str()),
            Self::Exact(e) => value == e,
            Self::DomainWildcard(base) => {
                value == base || value.ends_with(&format!(".{}", base))
            }
        }
    }

    /// Does this pattern cover everything `other` can match? Used by the
    /// `explicit` spawn mode to enforce strict subsumption against a parent.
    pub fn subsumes(&self, other: &Pattern) -> bool {
        match (self, other) {
            (Self::Any, _) => true,
            (Self::Prefix(p), Self::Prefix(q)) => q.starts_with(p.as_str()),
            (Self::Prefix(p), Self::Exact(e)) => e.starts_with(p.as_str()),
            (Self::Suffix(s), Self::Suffix(t)) => t.ends_with(s.as_str()),
            (Self::Suffix(s), Self::Exact(e)) => e.ends_with(s.as_str()),
            (Self::Exact(a), Self::Exact(b)) => a == b,
            (Self::DomainWildcard(base), Self::DomainWildcard(other_base)) => {
                other_base == base || other_base.ends_with(&format!(".{}", base))
            }
            (Self::DomainWildcard(base), Self::Exact(e)) => {
                e == base || e.ends_with(&format!(".{}", base))
            }
            _ => false,
        }
    }
}

/// Match a tool action against an uncompiled pattern list.
pub fn matches_tool(patterns: &[String], action: &str) -> bool {
    patterns
        .iter()
        .filter_map(|raw| Pattern::compile_tool(raw).ok())
        .any(|p| p.matches(action))
}

/// Match a domain against an uncompiled pattern list.
pub fn matches_domain(patterns: &[String], domain: &str) -> bool {
    patterns
        .iter()
        .filter_map(|raw| Pattern::compile_domain(raw).ok())
        .any(|p| p.matches(domain))
}
