//! Cascading termination of descendants.
//!
//! When a TERMINATE lands on an agent that spawned children, every
//! registered descendant is terminated too, leaves first (deepest
//! generation first) so no orphan outlives its subtree root. Terminations
//! fan out in bounded-parallel batches with a per-child timeout; a child
//! that fails or times out is reported, never silently skipped.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::command::KillSwitchCommand;

/// The hook a registered child exposes for remote termination.
#[async_trait]
pub trait ChildTerminator: Send + Sync {
    async fn terminate(&self, command: &KillSwitchCommand) -> Result<(), String>;
}

/// Cascade fan-out settings.
#[derive(Debug, Clone)]
pub struct CascadeConfig {
    pub max_parallel_terminations: usize,
    pub termination_timeout: Duration,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            max_parallel_terminations: 10,
            termination_timeout: Duration::from_secs(30),
        }
    }
}

/// A child that failed to terminate, with the error we saw.
#[derive(Debug, Clone, Serialize)]
pub struct FailedChild {
    pub instance_id: Uuid,
    pub error: String,
}

/// Cascade outcome summary.
#[derive(Debug, Clone, Serialize)]
pub struct CascadeResult {
    pub total_children: usize,
    pub terminated: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub failed_children: Vec<FailedChild>,
}

struct RegisteredChild {
    instance_id: Uuid,
    generation_depth: u32,
    handler: Arc<dyn ChildTerminator>,
}

/// Registry of live descendants and the cascade executor.
pub struct CascadeManager {
    config: CascadeConfig,
    children: RwLock<Vec<RegisteredChild>>,
}

impl Default for CascadeManager {
    fn default() -> Self {
        Self::new(CascadeConfig::default())
    }
}

impl CascadeManager {
    pub fn new(config: CascadeConfig) -> Self {
        Self {
            config,
            children: RwLock::new(Vec::new()),
        }
    }

    pub fn register(
        &self,
        instance_id: Uuid,
        generation_depth: u32,
        handler: Arc<dyn ChildTerminator>,
    ) {
        self.children.write().push(RegisteredChild {
            instance_id,
            generation_depth,
            handler,
        });
    }

    /// Remove a child that exited on its own.
    pub fn unregister(&self, instance_id: Uuid) {
        self.children.write().retain(|c| c.instance_id != instance_id);
    }

    pub fn child_count(&self) -> usize {
        self.children.read().len()
    }

    /// Terminate every registered descendant, deepest generation first, in
    /// parallel batches of `max_parallel_terminations`.
    pub async fn cascade(&self, parent_command: &KillSwitchCommand) -> CascadeResult {
        let started = Instant::now();
        let mut targets: Vec<(Uuid, u32, Arc<dyn ChildTerminator>)> = {
            let children = self.children.read();
            children
                .iter()
                .map(|c| (c.instance_id, c.generation_depth, c.handler.clone()))
                .collect()
        };
        // Leaves first.
        targets.sort_by(|a, b| b.1.cmp(&a.1));

        let total_children = targets.len();
        let mut terminated = 0usize;
        let mut failed_children = Vec::new();

        for batch in targets.chunks(self.config.max_parallel_terminations.max(1)) {
            let mut set = JoinSet::new();
            for (instance_id, _, handler) in batch {
                let instance_id = *instance_id;
                let handler = handler.clone();
                let command = parent_command.derive_for_child(instance_id);
                let timeout = self.config.termination_timeout;
                set.spawn(async move {
                    let outcome =
                        match tokio::time::timeout(timeout, handler.terminate(&command)).await {
                            Ok(Ok(())) => Ok(()),
                            Ok(Err(e)) => Err(e),
                            Err(_) => Err(format!("termination timed out after {timeout:?}")),
                        };
                    (instance_id, outcome)
                });
            }
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok((_, Ok(()))) => terminated += 1,
                    Ok((instance_id, Err(error))) => {
                        tracing::error!(%instance_id, %error, "Child termination failed");
                        failed_children.push(FailedChild { instance_id, error });
                    }
                    Err(join_error) => {
                        tracing::error!(%join_error, "Child termination task panicked");
                        failed_children.push(FailedChild {
                            instance_id: Uuid::nil(),
                            error: join_error.to_string(),
                        });
                    }
                }
            }
        }

        let result = CascadeResult {
            total_children,
            terminated,
            failed: failed_children.len(),
            duration_ms: started.elapsed().as_millis() as u64,
            failed_children,
        };
        tracing::warn!(
            total = result.total_children,
            terminated = result.terminated,
            failed = result.failed,
            duration_ms = result.duration_ms,
            "Cascade completed"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandType;
    use parking_lot::Mutex;

    struct Recorder {
        order: Arc<Mutex<Vec<Uuid>>>,
        fail: bool,
    }

    #[async_trait]
    impl ChildTerminator for Recorder {
        async fn terminate(&self, command: &KillSwitchCommand) -> Result<(), String> {
            assert!(command.reason.starts_with("Cascaded from parent:"));
            let id = command.instance_id.expect("child command is targeted");
            self.order.lock().push(id);
            if self.fail {
                Err("child unreachable".to_string())
            } else {
                Ok(())
            }
        }
    }

    fn parent_command() -> KillSwitchCommand {
        KillSwitchCommand::new(CommandType::Terminate, "runaway spend", "ops@acme")
    }

    #[tokio::test]
    async fn test_cascade_all_children() {
        let manager = CascadeManager::default();
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut ids = Vec::new();
        for _ in 0..10 {
            let id = Uuid::new_v4();
            ids.push(id);
            manager.register(id, 1, Arc::new(Recorder { order: order.clone(), fail: false }));
        }

        let result = manager.cascade(&parent_command()).await;
        assert_eq!(result.total_children, 10);
        assert_eq!(result.terminated, 10);
        assert_eq!(result.failed, 0);
        assert_eq!(order.lock().len(), 10);
    }

    #[tokio::test]
    async fn test_cascade_leaves_first() {
        let manager = CascadeManager::new(CascadeConfig {
            max_parallel_terminations: 1,
            termination_timeout: Duration::from_secs(5),
        });
        let order = Arc::new(Mutex::new(Vec::new()));
        let shallow = Uuid::new_v4();
        let deep = Uuid::new_v4();
        manager.register(shallow, 1, Arc::new(Recorder { order: order.clone(), fail: false }));
        manager.register(deep, 3, Arc::new(Recorder { order: order.clone(), fail: false }));

        manager.cascade(&parent_command()).await;
        let seen = order.lock().clone();
        assert_eq!(seen, vec![deep, shallow]);
    }

    #[tokio::test]
    async fn test_cascade_reports_failures() {
        let manager = CascadeManager::default();
        let order = Arc::new(Mutex::new(Vec::new()));
        let ok_child = Uuid::new_v4();
        let bad_child = Uuid::new_v4();
        manager.register(ok_child, 1, Arc::new(Recorder { order: order.clone(), fail: false }));
        manager.register(bad_child, 1, Arc::new(Recorder { order: order.clone(), fail: true }));

        let result = manager.cascade(&parent_command()).await;
        assert_eq!(result.terminated, 1);
        assert_eq!(result.failed, 1);
        assert_eq!(result.failed_children[0].instance_id, bad_child);
    }

    #[tokio::test]
    async fn test_cascade_child_timeout() {
        struct Hang;
        #[async_trait]
        impl ChildTerminator for Hang {
            async fn terminate(&self, _command: &KillSwitchCommand) -> Result<(), String> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
        }

        let manager = CascadeManager::new(CascadeConfig {
            max_parallel_terminations: 10,
            termination_timeout: Duration::from_millis(20),
        });
        manager.register(Uuid::new_v4(), 1, Arc::new(Hang));

        let result = manager.cascade(&parent_command()).await;
        assert_eq!(result.failed, 1);
        assert!(result.failed_children[0].error.contains("timed out"));
    }

    #[tokio::test]
    async fn test_unregister() {
        let manager = CascadeManager::default();
        let id = Uuid::new_v4();
        manager.register(id, 1, Arc::new(Recorder { order: Arc::new(Mutex::new(Vec::new())), fail: false }));
        assert_eq!(manager.child_count(), 1);
        manager.unregister(id);
        assert_eq!(manager.child_count(), 0);
    }
}
