//! End-to-end kill-switch flow: signed command in, state transition,
//! cascade to registered children, replay rejection.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use aigos_identity::factory::{AssetRecord, CapabilityOverrides, IdentityFactory};
use aigos_identity::types::{GoldenThread, RiskLevel};
use aigos_killswitch::{
    signing_bytes, sign_hs256, AgentState, CascadeManager, ChildTerminator, CommandType,
    KillSwitchCommand, KillSwitchReceiver, KillSwitchState, ReceiverConfig, ReplayCache,
    TrustedKey, TrustedKeyStore,
};
use aigos_ledger::RecordingSink;

const SECRET: &[u8] = b"integration-secret";

struct CountingChild {
    terminated: Arc<Mutex<Vec<Uuid>>>,
}

#[async_trait]
impl ChildTerminator for CountingChild {
    async fn terminate(&self, command: &KillSwitchCommand) -> Result<(), String> {
        assert!(command.command_id.contains("-child-"));
        self.terminated
            .lock()
            .push(command.instance_id.expect("targeted"));
        Ok(())
    }
}

fn signed(mut command: KillSwitchCommand) -> KillSwitchCommand {
    command.kid = Some("ops".to_string());
    command.signature = Some(sign_hs256(SECRET, &signing_bytes(&command)));
    command
}

#[tokio::test]
async fn test_emergency_shutdown_flips_global_kill_and_cascades() {
    let factory = IdentityFactory::new();
    let parent = factory
        .create(
            &AssetRecord {
                asset_id: "acme/orchestrator".to_string(),
                name: "Orchestrator".to_string(),
                version: "3.0.0".to_string(),
                risk_level: RiskLevel::Minimal,
                approval: Some(GoldenThread::new(
                    "CHG-99",
                    "ciso@acme.example",
                    "2026-02-01T00:00:00Z",
                )),
            },
            Some(&CapabilityOverrides {
                may_spawn_children: Some(true),
                max_child_depth: Some(2),
                ..Default::default()
            }),
        )
        .unwrap();

    let cascade = Arc::new(CascadeManager::default());
    let terminated = Arc::new(Mutex::new(Vec::new()));
    for _ in 0..3 {
        let child = factory.spawn_child(&parent, None, None).unwrap();
        cascade.register(
            child.instance_id,
            child.lineage.generation_depth,
            Arc::new(CountingChild {
                terminated: terminated.clone(),
            }),
        );
    }

    let state = Arc::new(KillSwitchState::new());
    let sink = Arc::new(RecordingSink::new());
    let receiver = KillSwitchReceiver::new(
        ReceiverConfig::default(),
        (&parent).into(),
        TrustedKeyStore::new().with_key("ops", TrustedKey::Hs256(SECRET.to_vec())),
        ReplayCache::default(),
        state.clone(),
        cascade,
        sink.clone(),
    );

    // An org-wide signed emergency stop, delivered like any other command.
    let shutdown = signed(
        KillSwitchCommand::new(CommandType::EmergencyShutdown, "credential leak", "ciso@acme")
            .targeting_organization("acme"),
    );
    let applied = receiver.handle_command(shutdown.clone()).await.unwrap();
    assert!(applied.transition.applied);
    let cascade_result = applied.cascade.expect("emergency cascades");
    assert_eq!(cascade_result.terminated, 3);

    // The flag is receiver-wide: instances this receiver never saw before
    // read as terminated, which is what the policy engine's first stage
    // consults on every check.
    assert!(state.is_global_kill());
    assert_eq!(
        state.status(uuid::Uuid::new_v4(), "acme/anything"),
        AgentState::Terminated
    );

    // Replay of the emergency command is caught like any other.
    assert_eq!(
        receiver.handle_command(shutdown).await.unwrap_err().code(),
        "REPLAY"
    );

    // Lifting restores agents that were not individually terminated.
    let lift = signed(
        KillSwitchCommand::new(CommandType::LiftEmergency, "incident closed", "ciso@acme")
            .targeting_organization("acme"),
    );
    assert!(receiver.handle_command(lift).await.unwrap().transition.applied);
    assert!(!state.is_global_kill());
    assert_eq!(
        state.status(parent.instance_id, &parent.asset_id),
        AgentState::Active
    );

    let events = sink.events();
    assert!(events
        .iter()
        .any(|e| e.event_type == "killswitch.emergency_shutdown"));
    assert!(events
        .iter()
        .any(|e| e.event_type == "killswitch.emergency_lifted"));
}

#[tokio::test]
async fn test_terminate_cascades_to_ten_children_and_rejects_replay() {
    // A parent that may spawn, with ten registered depth-1 children.
    let factory = IdentityFactory::new();
    let parent = factory
        .create(
            &AssetRecord {
                asset_id: "acme/orchestrator".to_string(),
                name: "Orchestrator".to_string(),
                version: "3.0.0".to_string(),
                risk_level: RiskLevel::Minimal,
                approval: Some(GoldenThread::new(
                    "CHG-88",
                    "ciso@acme.example",
                    "2026-02-01T00:00:00Z",
                )),
            },
            Some(&CapabilityOverrides {
                may_spawn_children: Some(true),
                max_child_depth: Some(3),
                ..Default::default()
            }),
        )
        .unwrap();

    let cascade = Arc::new(CascadeManager::default());
    let terminated = Arc::new(Mutex::new(Vec::new()));
    for _ in 0..10 {
        let child = factory.spawn_child(&parent, None, None).unwrap();
        cascade.register(
            child.instance_id,
            child.lineage.generation_depth,
            Arc::new(CountingChild {
                terminated: terminated.clone(),
            }),
        );
    }

    let sink = Arc::new(RecordingSink::new());
    let receiver = KillSwitchReceiver::new(
        ReceiverConfig::default(),
        (&parent).into(),
        TrustedKeyStore::new().with_key("ops", TrustedKey::Hs256(SECRET.to_vec())),
        ReplayCache::default(),
        Arc::new(KillSwitchState::new()),
        cascade,
        sink.clone(),
    );

    let command = signed(
        KillSwitchCommand::new(CommandType::Terminate, "runaway swarm", "ops@acme")
            .targeting_instance(parent.instance_id),
    );

    let applied = receiver.handle_command(command.clone()).await.unwrap();
    let cascade_result = applied.cascade.expect("terminate cascades");
    assert_eq!(cascade_result.total_children, 10);
    assert_eq!(cascade_result.terminated, 10);
    assert_eq!(cascade_result.failed, 0);
    assert_eq!(terminated.lock().len(), 10);
    assert_eq!(
        receiver
            .state()
            .status(parent.instance_id, &parent.asset_id),
        AgentState::Terminated
    );

    // A replayed identical command id is rejected.
    let replay = receiver.handle_command(command).await.unwrap_err();
    assert_eq!(replay.code(), "REPLAY");

    // The ledger saw the termination and the cascade summary.
    let events = sink.events();
    assert!(events.iter().any(|e| e.event_type == "killswitch.terminated"));
    assert!(events
        .iter()
        .any(|e| e.event_type == "killswitch.cascade_completed"
            && e.data["terminated"] == 10));
    // Every recorded event carries a verifiable content hash.
    assert!(events.iter().all(|e| e.verify_hash()));
}
