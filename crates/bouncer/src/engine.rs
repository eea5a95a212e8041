//! The policy engine: ordered, short-circuiting decision pipeline.
//!
//! Stages, in order, first denial wins:
//! 1. KILL_SWITCH: O(1) read of the shared control state
//! 2. CAPABILITY: denied tools, then allowed tools; deny beats allow
//! 3. RESOURCE_DENY: denied domain patterns against the resource
//! 4. RESOURCE_ALLOW: if allow patterns exist the resource must match one
//! 5. BUDGET: session/daily/monthly cost and calls-per-minute, race-free
//! 6. SCHEDULE: optional UTC operating window, deny-only
//! 7. CUSTOM: caller-supplied deny-only hooks
//!
//! The default is deny: a check where no allow pattern fired ends as
//! `CUSTOM_DENIED` unless `default_allow` is configured. In dry-run mode
//! denials are let through flagged `would_deny`.
//!
//! Pattern-compile errors are surfaced by [`PolicyEngine::validate_manifest`]
//! at load time; at check time an uncompilable pattern can only fail
//! closed (it matches nothing).

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{Datelike, Timelike, Utc, Weekday};
use serde_json::json;

use aigos_identity::patterns::PatternError;
use aigos_identity::types::{CapabilitiesManifest, RuntimeIdentity};
use aigos_killswitch::{AgentState, KillSwitchState};
use aigos_ledger::{Criticality, EventBuilder, EventSink};

use crate::budget::{BudgetKeys, BudgetLedger, BudgetWindowKind};
use crate::cache::{CacheStats, PatternCache};
use crate::decision::{Decision, DecisionCode, Stage};

/// Optional UTC operating window. Deny-only: being inside the window never
/// allows anything on its own.
#[derive(Debug, Clone)]
pub struct ScheduleWindow {
    /// Inclusive start hour, exclusive end hour, UTC.
    pub start_hour: u32,
    pub end_hour: u32,
    /// Empty means every day.
    pub days: Vec<Weekday>,
}

impl ScheduleWindow {
    fn permits(&self, now: chrono::DateTime<Utc>) -> bool {
        let hour = now.hour();
        let in_hours = if self.start_hour <= self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            // Overnight window, e.g. 22-06.
            hour >= self.start_hour || hour < self.end_hour
        };
        let in_days = self.days.is_empty() || self.days.contains(&now.weekday());
        in_hours && in_days
    }
}

/// Additional deny-only check supplied by the embedder.
#[async_trait]
pub trait PolicyCheck: Send + Sync {
    fn name(&self) -> &str;
    /// `Some(reason)` denies the call.
    async fn check(&self, ctx: &CheckContext<'_>) -> Option<String>;
}

/// Everything a stage may look at for one call.
pub struct CheckContext<'a> {
    pub identity: &'a RuntimeIdentity,
    pub action: &'a str,
    pub resource: Option<&'a str>,
    /// Estimated cost of the call, charged against budgets when allowed.
    pub cost: f64,
    pub data: serde_json::Value,
}

/// Engine settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Let unmatched actions through instead of the default deny.
    pub default_allow: bool,
    /// Record denials but let the call through, flagged.
    pub dry_run: bool,
    pub schedule: Option<ScheduleWindow>,
    pub max_cache_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_allow: false,
            dry_run: false,
            schedule: None,
            max_cache_size: 1_024,
        }
    }
}

/// The Bouncer.
pub struct PolicyEngine {
    config: EngineConfig,
    cache: PatternCache,
    budget: BudgetLedger,
    kill_state: Arc<KillSwitchState>,
    custom_checks: Vec<Arc<dyn PolicyCheck>>,
    sink: Arc<dyn EventSink>,
}

impl PolicyEngine {
    pub fn new(config: EngineConfig, kill_state: Arc<KillSwitchState>, sink: Arc<dyn EventSink>) -> Self {
        let cache = PatternCache::new(config.max_cache_size);
        Self {
            config,
            cache,
            budget: BudgetLedger::new(),
            kill_state,
            custom_checks: Vec::new(),
            sink,
        }
    }

    pub fn with_check(mut self, check: Arc<dyn PolicyCheck>) -> Self {
        self.custom_checks.push(check);
        self
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn budget(&self) -> &BudgetLedger {
        &self.budget
    }

    /// Compile every pattern in a manifest. Call at load time; a failure
    /// here is fatal configuration, not a runtime denial.
    pub fn validate_manifest(&self, manifest: &CapabilitiesManifest) -> Result<(), PatternError> {
        for raw in manifest.denied_tools.iter().chain(&manifest.allowed_tools) {
            self.cache.get_or_compile(raw, false)?;
        }
        for raw in manifest.denied_domains.iter().chain(&manifest.allowed_domains) {
            self.cache.get_or_compile(raw, true)?;
        }
        Ok(())
    }

    /// May `identity` perform `action` on `resource` now?
    pub async fn check(&self, ctx: &CheckContext<'_>) -> Decision {
        let started = Instant::now();
        let denial = self.evaluate(ctx).await;
        let duration_ms = started.elapsed().as_secs_f64() * 1_000.0;

        let mut decision = match denial {
            None => Decision::allow("allowed by capability manifest", duration_ms),
            Some((code, stage, reason)) => Decision::deny(code, stage, reason, duration_ms),
        };
        if self.config.dry_run {
            decision = decision.into_dry_run();
        }

        if decision.denied_by.is_some() && decision.dry_run.is_none() {
            tracing::warn!(
                instance_id = %ctx.identity.instance_id,
                action = ctx.action,
                code = decision.code.as_str(),
                denied_by = %decision.denied_by.expect("denied"),
                "Policy denied action"
            );
        }
        self.emit_decision(ctx, &decision);
        decision
    }

    async fn evaluate(&self, ctx: &CheckContext<'_>) -> Option<(DecisionCode, Stage, String)> {
        let identity = ctx.identity;
        let manifest = &identity.capabilities_manifest;

        // Stage 1: kill switch, O(1).
        match self
            .kill_state
            .status(identity.instance_id, &identity.asset_id)
        {
            AgentState::Terminated => {
                return Some((
                    DecisionCode::Terminated,
                    Stage::KillSwitch,
                    "agent is terminated".to_string(),
                ))
            }
            AgentState::Paused => {
                return Some((
                    DecisionCode::Paused,
                    Stage::KillSwitch,
                    "agent is paused".to_string(),
                ))
            }
            AgentState::Active => {}
        }

        // Stage 2: capability. Deny patterns win over allow patterns.
        if self.any_match(&manifest.denied_tools, ctx.action, false) {
            return Some((
                DecisionCode::CapabilityDenied,
                Stage::Capability,
                format!("action '{}' matches a denied tool pattern", ctx.action),
            ));
        }
        let capability_allowed = self.any_match(&manifest.allowed_tools, ctx.action, false);

        // Stages 3 and 4: resource deny, then mandatory allow-list match.
        if let Some(resource) = ctx.resource {
            if self.any_match(&manifest.denied_domains, resource, true) {
                return Some((
                    DecisionCode::ResourceDenied,
                    Stage::ResourceDeny,
                    format!("resource '{resource}' matches a denied pattern"),
                ));
            }
            if !manifest.allowed_domains.is_empty()
                && !self.any_match(&manifest.allowed_domains, resource, true)
            {
                return Some((
                    DecisionCode::ResourceNotAllowed,
                    Stage::ResourceAllow,
                    format!("resource '{resource}' matches no allowed pattern"),
                ));
            }
        }

        // Stage 5: budgets, race-free under the ledger lock.
        let keys = BudgetKeys {
            instance_id: identity.instance_id,
            org_id: identity.org_id().to_string(),
            asset_id: identity.asset_id.clone(),
        };
        match self.budget.try_charge(&keys, manifest, ctx.cost) {
            Ok(charge) => {
                for warning in charge.warnings {
                    self.emit_budget_warning(ctx, &warning.kind, warning.cap, warning.spent);
                }
            }
            Err(denial) => {
                let code = match denial.kind {
                    BudgetWindowKind::CallsPerMinute => DecisionCode::RateExceeded,
                    _ => DecisionCode::BudgetExceeded,
                };
                return Some((
                    code,
                    Stage::Budget,
                    format!(
                        "{:?} window: {} would exceed cap {}",
                        denial.kind, denial.attempted, denial.cap
                    ),
                ));
            }
        }

        // Stage 6: schedule, deny-only.
        if let Some(window) = &self.config.schedule {
            if !window.permits(Utc::now()) {
                return Some((
                    DecisionCode::ScheduleDenied,
                    Stage::Schedule,
                    "outside the configured operating window".to_string(),
                ));
            }
        }

        // Stage 7: custom deny-only hooks.
        for check in &self.custom_checks {
            if let Some(reason) = check.check(ctx).await {
                return Some((
                    DecisionCode::CustomDenied,
                    Stage::Custom,
                    format!("{}: {}", check.name(), reason),
                ));
            }
        }

        // Default deny: nothing allowed this action.
        if !capability_allowed && !self.config.default_allow {
            return Some((
                DecisionCode::CustomDenied,
                Stage::Custom,
                format!("action '{}' matched no allow rule", ctx.action),
            ));
        }
        None
    }

    fn any_match(&self, patterns: &[String], value: &str, domain: bool) -> bool {
        patterns.iter().any(|raw| {
            self.cache
                .get_or_compile(raw, domain)
                .map(|p| p.matches(value))
                .unwrap_or(false)
        })
    }

    fn emit_decision(&self, ctx: &CheckContext<'_>, decision: &Decision) {
        let identity = ctx.identity;
        let data = json!({
            "instanceId": identity.instance_id,
            "action": ctx.action,
            "resource": ctx.resource,
            "allowed": decision.allowed,
            "code": decision.code,
            "deniedBy": decision.denied_by,
            "durationMs": decision.duration_ms,
            "dryRun": decision.dry_run,
            "wouldDeny": decision.would_deny,
        });
        let event = |event_type: &str, criticality: Criticality| {
            EventBuilder::new(
                event_type,
                "policy",
                identity.org_id().to_string(),
                identity.asset_id.clone(),
            )
            .source("aigos-bouncer")
            .criticality(criticality)
            .golden_thread(identity.golden_thread.clone())
            .data(data.clone())
            .build()
        };

        // Every check is recorded; denials (and would-deny dry runs)
        // additionally raise a violation.
        self.sink.submit(event("policy.decision", Criticality::Normal));
        if !decision.allowed || decision.would_deny == Some(true) {
            self.sink.submit(event("policy.violation", Criticality::High));
        }
    }

    fn emit_budget_warning(
        &self,
        ctx: &CheckContext<'_>,
        kind: &BudgetWindowKind,
        cap: f64,
        spent: f64,
    ) {
        let identity = ctx.identity;
        tracing::warn!(
            instance_id = %identity.instance_id,
            ?kind,
            cap,
            spent,
            "Budget window crossed 80% of cap"
        );
        self.sink.submit(
            EventBuilder::new(
                "budget.warning",
                "policy",
                identity.org_id().to_string(),
                identity.asset_id.clone(),
            )
            .source("aigos-bouncer")
            .criticality(Criticality::High)
            .data(json!({
                "instanceId": identity.instance_id,
                "window": kind,
                "cap": cap,
                "spent": spent,
            }))
            .build(),
        );
    }
}

/// Convenience for tests and simple embedders.
pub fn check_context<'a>(
    identity: &'a RuntimeIdentity,
    action: &'a str,
    resource: Option<&'a str>,
) -> CheckContext<'a> {
    CheckContext {
        identity,
        action,
        resource,
        cost: 0.0,
        data: serde_json::Value::Null,
    }
}

/// Build budget keys for an identity. Used by embedders that pre-charge.
pub fn budget_keys(identity: &RuntimeIdentity) -> BudgetKeys {
    BudgetKeys {
        instance_id: identity.instance_id,
        org_id: identity.org_id().to_string(),
        asset_id: identity.asset_id.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aigos_identity::factory::{AssetRecord, CapabilityOverrides, IdentityFactory};
    use aigos_identity::types::{GoldenThread, RiskLevel};
    use aigos_killswitch::CommandType;
    use aigos_ledger::RecordingSink;

    fn identity(overrides: CapabilityOverrides) -> RuntimeIdentity {
        IdentityFactory::new()
            .create(
                &AssetRecord {
                    asset_id: "acme/support-bot".to_string(),
                    name: "Support Bot".to_string(),
                    version: "1.0.0".to_string(),
                    risk_level: RiskLevel::Limited,
                    approval: Some(GoldenThread::new(
                        "CHG-1",
                        "ciso@acme.example",
                        "2026-01-01T00:00:00Z",
                    )),
                },
                Some(&overrides),
            )
            .unwrap()
    }

    fn engine(config: EngineConfig) -> (PolicyEngine, Arc<RecordingSink>, Arc<KillSwitchState>) {
        let sink = Arc::new(RecordingSink::new());
        let state = Arc::new(KillSwitchState::new());
        let engine = PolicyEngine::new(config, state.clone(), sink.clone());
        (engine, sink, state)
    }

    #[tokio::test]
    async fn test_denied_tool_wins_over_allow_all() {
        let identity = identity(CapabilityOverrides {
            allowed_tools: Some(vec!["*".to_string()]),
            denied_tools: Some(vec!["admin:*".to_string()]),
            ..Default::default()
        });
        let (engine, _, _) = engine(EngineConfig::default());

        let decision = engine
            .check(&check_context(&identity, "admin:delete", Some("users")))
            .await;
        assert!(!decision.allowed);
        assert_eq!(decision.code, DecisionCode::CapabilityDenied);
        assert_eq!(decision.denied_by, Some(Stage::Capability));
    }

    #[tokio::test]
    async fn test_allowed_action_passes() {
        let identity = identity(CapabilityOverrides {
            allowed_tools: Some(vec!["db:*".to_string()]),
            ..Default::default()
        });
        let (engine, sink, _) = engine(EngineConfig::default());

        let decision = engine.check(&check_context(&identity, "db:read", None)).await;
        assert!(decision.allowed);
        assert_eq!(decision.code, DecisionCode::Allowed);
        assert!(sink.events().iter().any(|e| e.event_type == "policy.decision"));
    }

    #[tokio::test]
    async fn test_unmatched_action_default_denied() {
        let identity = identity(CapabilityOverrides {
            allowed_tools: Some(vec!["db:*".to_string()]),
            ..Default::default()
        });
        let (strict, _, _) = engine(EngineConfig::default());

        let decision = strict
            .check(&check_context(&identity, "send_email", None))
            .await;
        assert!(!decision.allowed);
        assert_eq!(decision.code, DecisionCode::CustomDenied);

        // With default_allow the same check passes.
        let (permissive, _, _) = engine(EngineConfig {
            default_allow: true,
            ..Default::default()
        });
        let decision = permissive
            .check(&check_context(&identity, "send_email", None))
            .await;
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn test_kill_switch_is_stage_one() {
        let identity = identity(CapabilityOverrides::default());
        let (engine, _, state) = engine(EngineConfig::default());
        state.apply_instance(identity.instance_id, CommandType::Pause);

        let decision = engine.check(&check_context(&identity, "db:read", None)).await;
        assert!(!decision.allowed);
        assert_eq!(decision.code, DecisionCode::Paused);
        assert_eq!(decision.denied_by, Some(Stage::KillSwitch));

        state.apply_instance(identity.instance_id, CommandType::Terminate);
        let decision = engine.check(&check_context(&identity, "db:read", None)).await;
        assert_eq!(decision.code, DecisionCode::Terminated);
    }

    #[tokio::test]
    async fn test_resource_deny_and_allow_stages() {
        let identity = identity(CapabilityOverrides {
            allowed_tools: Some(vec!["*".to_string()]),
            allowed_domains: Some(vec!["*.example.com".to_string()]),
            denied_domains: Some(vec!["*.internal.example.com".to_string()]),
            ..Default::default()
        });
        let (engine, _, _) = engine(EngineConfig::default());

        let denied = engine
            .check(&check_context(&identity, "http:get", Some("api.internal.example.com")))
            .await;
        assert_eq!(denied.code, DecisionCode::ResourceDenied);
        assert_eq!(denied.denied_by, Some(Stage::ResourceDeny));

        let outside = engine
            .check(&check_context(&identity, "http:get", Some("evil.com")))
            .await;
        assert_eq!(outside.code, DecisionCode::ResourceNotAllowed);
        assert_eq!(outside.denied_by, Some(Stage::ResourceAllow));

        let fine = engine
            .check(&check_context(&identity, "http:get", Some("api.example.com")))
            .await;
        assert!(fine.allowed);
    }

    #[tokio::test]
    async fn test_budget_denial_and_warning_events() {
        let identity = identity(CapabilityOverrides {
            allowed_tools: Some(vec!["*".to_string()]),
            max_cost_per_session: Some(10.0),
            ..Default::default()
        });
        let (engine, sink, _) = engine(EngineConfig::default());

        let mut ctx = check_context(&identity, "llm:call", None);
        ctx.cost = 9.0;
        assert!(engine.check(&ctx).await.allowed);
        assert!(sink.events().iter().any(|e| e.event_type == "budget.warning"));

        ctx.cost = 2.0;
        let denied = engine.check(&ctx).await;
        assert!(!denied.allowed);
        assert_eq!(denied.code, DecisionCode::BudgetExceeded);
        assert_eq!(denied.denied_by, Some(Stage::Budget));
        assert!(sink.events().iter().any(|e| e.event_type == "policy.violation"));
    }

    #[tokio::test]
    async fn test_rate_cap_uses_rate_code() {
        let identity = identity(CapabilityOverrides {
            allowed_tools: Some(vec!["*".to_string()]),
            max_calls_per_minute: Some(2),
            ..Default::default()
        });
        let (engine, _, _) = engine(EngineConfig::default());

        for _ in 0..2 {
            assert!(engine.check(&check_context(&identity, "a", None)).await.allowed);
        }
        let denied = engine.check(&check_context(&identity, "a", None)).await;
        assert_eq!(denied.code, DecisionCode::RateExceeded);
    }

    #[tokio::test]
    async fn test_custom_check_denies() {
        struct NoWeekendDeploys;
        #[async_trait]
        impl PolicyCheck for NoWeekendDeploys {
            fn name(&self) -> &str {
                "no-deploys"
            }
            async fn check(&self, ctx: &CheckContext<'_>) -> Option<String> {
                (ctx.action == "deploy").then(|| "deploys are frozen".to_string())
            }
        }

        let identity = identity(CapabilityOverrides {
            allowed_tools: Some(vec!["*".to_string()]),
            ..Default::default()
        });
        let sink = Arc::new(RecordingSink::new());
        let engine = PolicyEngine::new(
            EngineConfig::default(),
            Arc::new(KillSwitchState::new()),
            sink,
        )
        .with_check(Arc::new(NoWeekendDeploys));

        let denied = engine.check(&check_context(&identity, "deploy", None)).await;
        assert_eq!(denied.code, DecisionCode::CustomDenied);
        assert_eq!(denied.denied_by, Some(Stage::Custom));

        let fine = engine.check(&check_context(&identity, "db:read", None)).await;
        assert!(fine.allowed);
    }

    #[tokio::test]
    async fn test_dry_run_flags_instead_of_denying() {
        let identity = identity(CapabilityOverrides {
            allowed_tools: Some(vec!["*".to_string()]),
            denied_tools: Some(vec!["admin:*".to_string()]),
            ..Default::default()
        });
        let (engine, _, _) = engine(EngineConfig {
            dry_run: true,
            ..Default::default()
        });

        let decision = engine
            .check(&check_context(&identity, "admin:delete", None))
            .await;
        assert!(decision.allowed);
        assert_eq!(decision.dry_run, Some(true));
        assert_eq!(decision.would_deny, Some(true));
        assert_eq!(decision.code, DecisionCode::CapabilityDenied);
    }

    #[tokio::test]
    async fn test_cache_warms_across_checks() {
        let identity = identity(CapabilityOverrides {
            allowed_tools: Some(vec!["db:*".to_string()]),
            ..Default::default()
        });
        let (engine, _, _) = engine(EngineConfig::default());

        engine.check(&check_context(&identity, "db:read", None)).await;
        let cold = engine.cache_stats();
        engine.check(&check_context(&identity, "db:write", None)).await;
        let warm = engine.cache_stats();

        assert!(warm.hits > cold.hits);
        assert_eq!(warm.misses, cold.misses);
    }

    #[test]
    fn test_schedule_window_logic() {
        let business_hours = ScheduleWindow {
            start_hour: 8,
            end_hour: 18,
            days: vec![],
        };
        let nine = "2026-03-02T09:00:00Z".parse().unwrap();
        let midnight = "2026-03-02T00:30:00Z".parse().unwrap();
        assert!(business_hours.permits(nine));
        assert!(!business_hours.permits(midnight));

        let overnight = ScheduleWindow {
            start_hour: 22,
            end_hour: 6,
            days: vec![],
        };
        assert!(overnight.permits(midnight));
        assert!(!overnight.permits(nine));
    }

    #[tokio::test]
    async fn test_validate_manifest_rejects_bad_pattern() {
        let (engine, _, _) = engine(EngineConfig::default());
        let mut manifest = CapabilitiesManifest::default();
        manifest.allowed_tools = vec!["in*valid".to_string()];
        assert!(engine.validate_manifest(&manifest).is_err());
    }
}
