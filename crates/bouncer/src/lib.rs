//! AIGOS-Bouncer: Per-Action Policy Engine
//!
//! Answers "may this agent perform this action on this resource now?" with
//! an ordered, short-circuiting pipeline: kill-switch state first, then
//! capability patterns, resource deny/allow lists, race-free budget and
//! rate ledgers, an optional operating schedule, and custom deny-only
//! hooks. Default deny. Every decision is recorded in the governance
//! ledger; denials become violation events and budget windows warn at 80%.

pub mod budget;
pub mod cache;
pub mod decision;
pub mod engine;

pub use budget::{
    BudgetCharge, BudgetDenial, BudgetKeys, BudgetLedger, BudgetWarning, BudgetWindowKind,
};
pub use cache::{CacheStats, PatternCache};
pub use decision::{Decision, DecisionCode, Stage};
pub use engine::{
    budget_keys, check_context, CheckContext, EngineConfig, PolicyCheck, PolicyEngine,
    ScheduleWindow,
};
