//! Kill-switch receiver: validation pipeline and command application.
//!
//! Channels deliver raw [`KillSwitchCommand`]s; the receiver validates
//! them in a fixed order (schema, clock skew, signature, replay, target),
//! applies the state transition serialized per instance, cascades
//! TERMINATE to registered descendants, and records everything in the
//! governance ledger. Validation failures are logged and counted, never
//! crash the receiver.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use rand::Rng;
use serde_json::json;
use tokio::sync::{mpsc, watch, Mutex};
use uuid::Uuid;

use aigos_identity::types::RuntimeIdentity;
use aigos_ledger::{Criticality, EventBuilder, EventSink};

use crate::cascade::{CascadeManager, CascadeResult};
use crate::command::{signing_bytes, CommandRejection, CommandType, KillSwitchCommand};
use crate::replay::ReplayCache;
use crate::signature::{SignatureError, TrustedKeyStore};
use crate::state::{AgentState, KillSwitchState, Transition};

/// Receiver settings.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Accepted distance between command timestamp and local clock.
    pub clock_skew: Duration,
    /// Off only when explicitly configured off.
    pub verify_signatures: bool,
    /// First reconnect delay.
    pub initial_backoff: StdDuration,
    /// Backoff ceiling.
    pub max_backoff: StdDuration,
    /// Reconnection attempts before giving up; 0 means infinite.
    pub max_reconnect_attempts: u32,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            clock_skew: Duration::seconds(60),
            verify_signatures: true,
            initial_backoff: StdDuration::from_secs(1),
            max_backoff: StdDuration::from_secs(30),
            max_reconnect_attempts: 0,
        }
    }
}

/// The identity a receiver protects, reduced to its targeting keys.
#[derive(Debug, Clone)]
pub struct TargetIdentity {
    pub instance_id: Uuid,
    pub asset_id: String,
    pub organization: String,
}

impl From<&RuntimeIdentity> for TargetIdentity {
    fn from(identity: &RuntimeIdentity) -> Self {
        Self {
            instance_id: identity.instance_id,
            asset_id: identity.asset_id.clone(),
            organization: identity.org_id().to_string(),
        }
    }
}

/// What applying one command produced.
#[derive(Debug)]
pub struct Applied {
    pub transition: Transition,
    pub cascade: Option<CascadeResult>,
}

/// The channel-facing receiver core.
pub struct KillSwitchReceiver {
    config: ReceiverConfig,
    target: TargetIdentity,
    keys: TrustedKeyStore,
    replay: ReplayCache,
    state: Arc<KillSwitchState>,
    cascade: Arc<CascadeManager>,
    sink: Arc<dyn EventSink>,
    // Serializes application so the per-instance state machine is
    // linearizable even when several channels deliver at once.
    apply_lock: Mutex<()>,
    processed: AtomicU64,
    rejected: AtomicU64,
}

impl KillSwitchReceiver {
    pub fn new(
        config: ReceiverConfig,
        target: TargetIdentity,
        keys: TrustedKeyStore,
        replay: ReplayCache,
        state: Arc<KillSwitchState>,
        cascade: Arc<CascadeManager>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config,
            target,
            keys,
            replay,
            state,
            cascade,
            sink,
            apply_lock: Mutex::new(()),
            processed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> &Arc<KillSwitchState> {
        &self.state
    }

    pub fn processed_count(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Validate and apply one command.
    pub async fn handle_command(
        &self,
        command: KillSwitchCommand,
    ) -> Result<Applied, CommandRejection> {
        match self.validate(&command) {
            Ok(()) => {}
            Err(rejection) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    command_id = %command.command_id,
                    code = rejection.code(),
                    "Kill-switch command rejected"
                );
                self.emit(
                    "killswitch.validation_failed",
                    Criticality::High,
                    json!({
                        "commandId": command.command_id,
                        "code": rejection.code(),
                        "issuedBy": command.issued_by,
                    }),
                );
                return Err(rejection);
            }
        }

        let _guard = self.apply_lock.lock().await;
        // First-processed wins; a concurrent duplicate on another channel
        // lost the race for the lock and is caught here.
        if !self.replay.insert(&command.command_id) {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(CommandRejection::Replay);
        }

        let transition = self.apply(command.command_type);
        self.processed.fetch_add(1, Ordering::Relaxed);

        let verb = match command.command_type {
            CommandType::Terminate => "killswitch.terminated",
            CommandType::Pause => "killswitch.paused",
            CommandType::Resume => "killswitch.resumed",
            CommandType::EmergencyShutdown => "killswitch.emergency_shutdown",
            CommandType::LiftEmergency => "killswitch.emergency_lifted",
        };
        tracing::warn!(
            command_id = %command.command_id,
            command_type = %command.command_type,
            applied = transition.applied,
            reason = %command.reason,
            issued_by = %command.issued_by,
            "Kill-switch command applied"
        );
        self.emit(
            verb,
            Criticality::Critical,
            json!({
                "commandId": command.command_id,
                "reason": command.reason,
                "issuedBy": command.issued_by,
                "applied": transition.applied,
                "from": transition.from,
                "to": transition.to,
            }),
        );

        let terminating = matches!(
            command.command_type,
            CommandType::Terminate | CommandType::EmergencyShutdown
        );
        let cascade = if terminating && transition.applied {
            let result = self.cascade.cascade(&command).await;
            self.emit(
                "killswitch.cascade_completed",
                Criticality::Critical,
                json!({
                    "commandId": command.command_id,
                    "totalChildren": result.total_children,
                    "terminated": result.terminated,
                    "failed": result.failed,
                    "durationMs": result.duration_ms,
                }),
            );
            Some(result)
        } else {
            None
        };

        Ok(Applied { transition, cascade })
    }

    /// Apply one verb: per-instance verbs go through the state machine,
    /// the emergency pair flips the receiver-wide kill flag.
    fn apply(&self, command: CommandType) -> Transition {
        match command {
            CommandType::EmergencyShutdown => {
                let from = self
                    .state
                    .status(self.target.instance_id, &self.target.asset_id);
                let applied = !self.state.is_global_kill();
                self.state.set_global_kill();
                Transition {
                    from,
                    to: AgentState::Terminated,
                    applied,
                }
            }
            CommandType::LiftEmergency => {
                let applied = self.state.is_global_kill();
                self.state.lift_global_kill();
                let to = self
                    .state
                    .status(self.target.instance_id, &self.target.asset_id);
                Transition {
                    from: if applied { AgentState::Terminated } else { to },
                    to,
                    applied,
                }
            }
            _ => self.state.apply_instance(self.target.instance_id, command),
        }
    }

    /// Validation order: schema, clock skew, signature, replay, target.
    fn validate(&self, command: &KillSwitchCommand) -> Result<(), CommandRejection> {
        if command.command_id.trim().is_empty() {
            return Err(CommandRejection::SchemaInvalid("empty command_id".into()));
        }
        if command.issued_by.trim().is_empty() {
            return Err(CommandRejection::SchemaInvalid("empty issued_by".into()));
        }

        let skew = Utc::now() - command.timestamp;
        if skew.abs() > self.config.clock_skew {
            return Err(CommandRejection::ClockSkew);
        }

        if self.config.verify_signatures {
            let signature = command
                .signature
                .as_deref()
                .ok_or(CommandRejection::SignatureMissing)?;
            let kid = command
                .kid
                .as_deref()
                .ok_or(CommandRejection::SignatureMissing)?;
            self.keys
                .verify(kid, &signing_bytes(command), signature)
                .map_err(|e| match e {
                    SignatureError::KeyNotFound(kid) => CommandRejection::KeyNotFound(kid),
                    _ => CommandRejection::SignatureInvalid,
                })?;
        }

        if self.replay.contains(&command.command_id) {
            return Err(CommandRejection::Replay);
        }

        self.match_target(command)
    }

    fn match_target(&self, command: &KillSwitchCommand) -> Result<(), CommandRejection> {
        let untargeted = command.instance_id.is_none()
            && command.asset_id.is_none()
            && command.organization.is_none();
        if untargeted {
            return Ok(());
        }
        if command.instance_id == Some(self.target.instance_id)
            || command.asset_id.as_deref() == Some(self.target.asset_id.as_str())
            || command.organization.as_deref() == Some(self.target.organization.as_str())
        {
            return Ok(());
        }
        Err(CommandRejection::TargetMismatch)
    }

    fn emit(&self, event_type: &str, criticality: Criticality, data: serde_json::Value) {
        self.sink.submit(
            EventBuilder::new(
                event_type,
                "killswitch",
                self.target.organization.clone(),
                self.target.asset_id.clone(),
            )
            .source("aigos-killswitch")
            .criticality(criticality)
            .data(data)
            .build(),
        );
    }
}

/// Exponential backoff with random jitter up to one second.
#[derive(Debug)]
pub struct Backoff {
    initial: StdDuration,
    max: StdDuration,
    attempt: u32,
}

impl Backoff {
    pub fn new(initial: StdDuration, max: StdDuration) -> Self {
        Self { initial, max, attempt: 0 }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Next delay: `initial * 2^attempt`, capped, plus jitter in [0, 1 s).
    pub fn next_delay(&mut self) -> StdDuration {
        let exp = self.initial.saturating_mul(1u32 << self.attempt.min(16));
        let base = exp.min(self.max);
        self.attempt = self.attempt.saturating_add(1);
        base + StdDuration::from_millis(rand::rng().random_range(0..1000))
    }
}

/// Drive one channel forever (or until shutdown): reconnect with backoff
/// on failure, reset backoff after a healthy run, stop after the bounded
/// attempt count when one is configured.
pub async fn run_channel(
    channel: Arc<dyn crate::channels::CommandChannel>,
    tx: mpsc::Sender<KillSwitchCommand>,
    config: ReceiverConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = Backoff::new(config.initial_backoff, config.max_backoff);
    loop {
        if *shutdown.borrow() {
            return;
        }
        match channel.run_once(&tx).await {
            Ok(()) => backoff.reset(),
            Err(error) => {
                tracing::warn!(channel = channel.name(), %error, "Kill-switch channel error");
                if config.max_reconnect_attempts != 0
                    && backoff.attempt() + 1 >= config.max_reconnect_attempts
                {
                    tracing::error!(
                        channel = channel.name(),
                        attempts = config.max_reconnect_attempts,
                        "Kill-switch channel gave up reconnecting"
                    );
                    return;
                }
                let delay = backoff.next_delay();
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => return,
                }
            }
        }
    }
}

/// Wire channels to a receiver: one supervisor task per channel, one
/// consumer task applying commands in arrival order.
pub fn spawn_receiver(
    receiver: Arc<KillSwitchReceiver>,
    channels: Vec<Arc<dyn crate::channels::CommandChannel>>,
    shutdown: watch::Receiver<bool>,
) -> Vec<tokio::task::JoinHandle<()>> {
    let (tx, mut rx) = mpsc::channel::<KillSwitchCommand>(64);
    let mut handles = Vec::new();

    for channel in channels {
        let config = receiver.config.clone();
        handles.push(tokio::spawn(run_channel(
            channel,
            tx.clone(),
            config,
            shutdown.clone(),
        )));
    }
    drop(tx);

    let consumer = receiver.clone();
    handles.push(tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            // Rejections are already counted and logged.
            let _ = consumer.handle_command(command).await;
        }
    }));
    handles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::{sign_hs256, TrustedKey};
    use aigos_ledger::RecordingSink;

    const SECRET: &[u8] = b"ops-shared-secret";

    fn receiver(verify: bool) -> (Arc<KillSwitchReceiver>, Arc<RecordingSink>, Uuid) {
        let instance_id = Uuid::new_v4();
        let sink = Arc::new(RecordingSink::new());
        let receiver = KillSwitchReceiver::new(
            ReceiverConfig {
                verify_signatures: verify,
                ..Default::default()
            },
            TargetIdentity {
                instance_id,
                asset_id: "acme/support-bot".to_string(),
                organization: "acme".to_string(),
            },
            TrustedKeyStore::new().with_key("ops-1", TrustedKey::Hs256(SECRET.to_vec())),
            ReplayCache::default(),
            Arc::new(KillSwitchState::new()),
            Arc::new(CascadeManager::default()),
            sink.clone(),
        );
        (Arc::new(receiver), sink, instance_id)
    }

    fn signed(mut command: KillSwitchCommand) -> KillSwitchCommand {
        command.kid = Some("ops-1".to_string());
        command.signature = Some(sign_hs256(SECRET, &signing_bytes(&command)));
        command
    }

    #[tokio::test]
    async fn test_signed_terminate_applies() {
        let (receiver, sink, instance_id) = receiver(true);
        let command = signed(
            KillSwitchCommand::new(CommandType::Terminate, "incident", "ops@acme")
                .targeting_instance(instance_id),
        );

        let applied = receiver.handle_command(command).await.unwrap();
        assert!(applied.transition.applied);
        assert_eq!(
            receiver.state().status(instance_id, "acme/support-bot"),
            crate::state::AgentState::Terminated
        );
        let events = sink.events();
        assert!(events.iter().any(|e| e.event_type == "killswitch.terminated"));
    }

    #[tokio::test]
    async fn test_replayed_command_id_rejected() {
        let (receiver, _, instance_id) = receiver(true);
        let command = signed(
            KillSwitchCommand::new(CommandType::Pause, "maintenance", "ops@acme")
                .targeting_instance(instance_id),
        );

        receiver.handle_command(command.clone()).await.unwrap();
        let err = receiver.handle_command(command).await.unwrap_err();
        assert_eq!(err.code(), "REPLAY");
        assert_eq!(receiver.rejected_count(), 1);
    }

    #[tokio::test]
    async fn test_bad_signature_rejected() {
        let (receiver, sink, instance_id) = receiver(true);
        let mut command = signed(
            KillSwitchCommand::new(CommandType::Terminate, "incident", "ops@acme")
                .targeting_instance(instance_id),
        );
        command.reason = "tampered in flight".to_string();

        let err = receiver.handle_command(command).await.unwrap_err();
        assert_eq!(err.code(), "SIGNATURE_INVALID");
        assert!(sink
            .events()
            .iter()
            .any(|e| e.event_type == "killswitch.validation_failed"));
    }

    #[tokio::test]
    async fn test_unsigned_rejected_unless_disabled() {
        let (strict, _, instance_id) = receiver(true);
        let command = KillSwitchCommand::new(CommandType::Pause, "m", "ops@acme")
            .targeting_instance(instance_id);
        let err = strict.handle_command(command.clone()).await.unwrap_err();
        assert_eq!(err.code(), "SIGNATURE_MISSING");

        let (relaxed, _, instance_id) = receiver(false);
        let command = KillSwitchCommand::new(CommandType::Pause, "m", "ops@acme")
            .targeting_instance(instance_id);
        assert!(relaxed.handle_command(command).await.is_ok());
    }

    #[tokio::test]
    async fn test_stale_timestamp_rejected() {
        let (receiver, _, instance_id) = receiver(true);
        let mut command = KillSwitchCommand::new(CommandType::Pause, "m", "ops@acme")
            .targeting_instance(instance_id);
        command.timestamp = Utc::now() - Duration::seconds(120);
        let command = signed(command);

        let err = receiver.handle_command(command).await.unwrap_err();
        assert_eq!(err.code(), "CLOCK_SKEW");
    }

    #[tokio::test]
    async fn test_target_filtering() {
        let (receiver, _, _) = receiver(true);

        // Someone else's instance.
        let other = signed(
            KillSwitchCommand::new(CommandType::Terminate, "x", "ops@acme")
                .targeting_instance(Uuid::new_v4()),
        );
        assert_eq!(
            receiver.handle_command(other).await.unwrap_err().code(),
            "TARGET_MISMATCH"
        );

        // Our organization.
        let org_wide = signed(
            KillSwitchCommand::new(CommandType::Pause, "org freeze", "ops@acme")
                .targeting_organization("acme"),
        );
        assert!(receiver.handle_command(org_wide).await.is_ok());
    }

    #[tokio::test]
    async fn test_resume_after_pause() {
        let (receiver, _, instance_id) = receiver(true);
        let pause = signed(
            KillSwitchCommand::new(CommandType::Pause, "hold", "ops@acme")
                .targeting_instance(instance_id),
        );
        receiver.handle_command(pause).await.unwrap();
        assert_eq!(
            receiver.state().status(instance_id, "acme/support-bot"),
            crate::state::AgentState::Paused
        );

        let resume = signed(
            KillSwitchCommand::new(CommandType::Resume, "resolved", "ops@acme")
                .targeting_instance(instance_id),
        );
        let applied = receiver.handle_command(resume).await.unwrap();
        assert!(applied.transition.applied);
        assert_eq!(
            receiver.state().status(instance_id, "acme/support-bot"),
            crate::state::AgentState::Active
        );
    }

    #[tokio::test]
    async fn test_emergency_shutdown_and_lift() {
        let (receiver, sink, instance_id) = receiver(true);

        // Untargeted emergency applies to every receiver that validates it.
        let shutdown = signed(KillSwitchCommand::new(
            CommandType::EmergencyShutdown,
            "suspected breach",
            "ciso@acme",
        ));
        let applied = receiver.handle_command(shutdown).await.unwrap();
        assert!(applied.transition.applied);
        assert!(receiver.state().is_global_kill());
        // Any instance behind this receiver now reads as terminated.
        assert_eq!(
            receiver.state().status(Uuid::new_v4(), "acme/other"),
            crate::state::AgentState::Terminated
        );

        // A second shutdown while engaged is a validated no-op.
        let again = signed(KillSwitchCommand::new(
            CommandType::EmergencyShutdown,
            "still down",
            "ciso@acme",
        ));
        let noop = receiver.handle_command(again).await.unwrap();
        assert!(!noop.transition.applied);

        let lift = signed(KillSwitchCommand::new(
            CommandType::LiftEmergency,
            "all clear",
            "ciso@acme",
        ));
        let lifted = receiver.handle_command(lift).await.unwrap();
        assert!(lifted.transition.applied);
        assert!(!receiver.state().is_global_kill());
        assert_eq!(
            receiver.state().status(instance_id, "acme/support-bot"),
            crate::state::AgentState::Active
        );

        let events = sink.events();
        assert!(events
            .iter()
            .any(|e| e.event_type == "killswitch.emergency_shutdown"));
        assert!(events
            .iter()
            .any(|e| e.event_type == "killswitch.emergency_lifted"));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = Backoff::new(StdDuration::from_secs(1), StdDuration::from_secs(8));
        let d1 = backoff.next_delay();
        let d2 = backoff.next_delay();
        let d3 = backoff.next_delay();
        let d5 = {
            backoff.next_delay();
            backoff.next_delay()
        };

        // Base doubles (jitter adds < 1 s on top).
        assert!(d1 >= StdDuration::from_secs(1) && d1 < StdDuration::from_secs(2));
        assert!(d2 >= StdDuration::from_secs(2) && d2 < StdDuration::from_secs(3));
        assert!(d3 >= StdDuration::from_secs(4) && d3 < StdDuration::from_secs(5));
        // Capped at max.
        assert!(d5 >= StdDuration::from_secs(8) && d5 < StdDuration::from_secs(9));

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
    }
}
