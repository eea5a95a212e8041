//! Ingest-side policy pipeline.
//!
//! Optional per-event rules evaluated as events are accepted. Findings are
//! advisory: violations, warnings, suggestions, or active waivers. A rule
//! never rewrites the event it matched.

use serde::{Deserialize, Serialize};

use crate::event::{Criticality, GovernanceEvent};

/// Severity of an ingest finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingKind {
    Violation,
    Warning,
    Suggestion,
    Waiver,
}

/// One ingest rule: match on type prefix and minimum criticality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRule {
    pub id: String,
    /// Dotted type prefix, e.g. `policy.` matches `policy.decision`.
    pub type_prefix: String,
    pub min_criticality: Criticality,
    pub kind: FindingKind,
    pub message: String,
}

impl IngestRule {
    fn matches(&self, event: &GovernanceEvent) -> bool {
        event.event_type.starts_with(&self.type_prefix)
            && event.criticality >= self.min_criticality
    }
}

/// A finding produced for one event.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyFinding {
    pub rule_id: String,
    pub event_id: String,
    pub kind: FindingKind,
    pub message: String,
}

/// The rule set evaluated on every accepted event.
#[derive(Debug, Clone, Default)]
pub struct IngestPolicy {
    rules: Vec<IngestRule>,
}

impl IngestPolicy {
    pub fn new(rules: Vec<IngestRule>) -> Self {
        Self { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn evaluate(&self, event: &GovernanceEvent) -> Vec<PolicyFinding> {
        self.rules
            .iter()
            .filter(|rule| rule.matches(event))
            .map(|rule| PolicyFinding {
                rule_id: rule.id.clone(),
                event_id: event.id.clone(),
                kind: rule.kind,
                message: rule.message.clone(),
            })
            .collect()
    }
}
