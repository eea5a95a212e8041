//! Agent control state: ACTIVE / PAUSED / TERMINATED.
//!
//! Read-mostly shared structure. The policy engine consults it first on
//! every decision, so reads are O(1) set lookups behind a `parking_lot`
//! read lock; writers replace entries wholesale and are rare (one per
//! accepted command). TERMINATED is absorbing.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::command::CommandType;

/// Per-instance lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentState {
    Active,
    Paused,
    Terminated,
}

/// Outcome of applying a command to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: AgentState,
    pub to: AgentState,
    /// False when the command was a no-op (e.g. RESUME while active, or
    /// anything after TERMINATE).
    pub applied: bool,
}

#[derive(Debug, Default)]
struct Inner {
    global_kill: bool,
    terminated_instances: HashSet<Uuid>,
    paused_instances: HashSet<Uuid>,
    terminated_assets: HashSet<String>,
    paused_assets: HashSet<String>,
}

/// Shared kill-switch state, handed to the policy engine by construction.
#[derive(Debug, Default)]
pub struct KillSwitchState {
    inner: RwLock<Inner>,
}

impl KillSwitchState {
    pub fn new() -> Self {
        Self::default()
    }

    /// O(1) liveness check the policy engine runs as stage one.
    pub fn status(&self, instance_id: Uuid, asset_id: &str) -> AgentState {
        let inner = self.inner.read();
        if inner.global_kill
            || inner.terminated_instances.contains(&instance_id)
            || inner.terminated_assets.contains(asset_id)
        {
            return AgentState::Terminated;
        }
        if inner.paused_instances.contains(&instance_id) || inner.paused_assets.contains(asset_id) {
            return AgentState::Paused;
        }
        AgentState::Active
    }

    pub fn is_global_kill(&self) -> bool {
        self.inner.read().global_kill
    }

    /// Engage the emergency flag. Every agent behind this receiver reads
    /// as TERMINATED until [`lift_global_kill`](Self::lift_global_kill).
    pub fn set_global_kill(&self) {
        self.inner.write().global_kill = true;
        tracing::error!("Emergency shutdown engaged: every policy check will deny");
    }

    /// Lift the emergency flag. Per-instance and per-asset terminations
    /// survive the lift; only the global override clears.
    pub fn lift_global_kill(&self) {
        self.inner.write().global_kill = false;
        tracing::warn!("Emergency shutdown lifted; non-terminated agents may resume");
    }

    /// Apply a command verb to one instance, honoring the state machine:
    /// ACTIVE -PAUSE-> PAUSED, PAUSED -RESUME-> ACTIVE, any -TERMINATE->
    /// TERMINATED (absorbing).
    pub fn apply_instance(&self, instance_id: Uuid, command: CommandType) -> Transition {
        let mut inner = self.inner.write();
        let from = if inner.terminated_instances.contains(&instance_id) {
            AgentState::Terminated
        } else if inner.paused_instances.contains(&instance_id) {
            AgentState::Paused
        } else {
            AgentState::Active
        };

        let (to, applied) = match (from, command) {
            (AgentState::Terminated, _) => (AgentState::Terminated, false),
            (_, CommandType::Terminate) => {
                inner.paused_instances.remove(&instance_id);
                inner.terminated_instances.insert(instance_id);
                (AgentState::Terminated, true)
            }
            (AgentState::Active, CommandType::Pause) => {
                inner.paused_instances.insert(instance_id);
                (AgentState::Paused, true)
            }
            (AgentState::Paused, CommandType::Resume) => {
                inner.paused_instances.remove(&instance_id);
                (AgentState::Active, true)
            }
            (state, _) => (state, false),
        };

        Transition { from, to, applied }
    }

    /// Apply a command verb at asset granularity.
    pub fn apply_asset(&self, asset_id: &str, command: CommandType) -> Transition {
        let mut inner = self.inner.write();
        let from = if inner.terminated_assets.contains(asset_id) {
            AgentState::Terminated
        } else if inner.paused_assets.contains(asset_id) {
            AgentState::Paused
        } else {
            AgentState::Active
        };

        let (to, applied) = match (from, command) {
            (AgentState::Terminated, _) => (AgentState::Terminated, false),
            (_, CommandType::Terminate) => {
                inner.paused_assets.remove(asset_id);
                inner.terminated_assets.insert(asset_id.to_string());
                (AgentState::Terminated, true)
            }
            (AgentState::Active, CommandType::Pause) => {
                inner.paused_assets.insert(asset_id.to_string());
                (AgentState::Paused, true)
            }
            (AgentState::Paused, CommandType::Resume) => {
                inner.paused_assets.remove(asset_id);
                (AgentState::Active, true)
            }
            (state, _) => (state, false),
        };

        Transition { from, to, applied }
    }

    pub fn terminated_count(&self) -> usize {
        self.inner.read().terminated_instances.len()
    }
}
