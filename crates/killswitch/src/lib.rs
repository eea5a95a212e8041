//! AIGOS-Killswitch: Remote Termination & Cascade
//!
//! Multi-channel delivery of signed TERMINATE/PAUSE/RESUME commands with
//! replay protection, a per-instance ACTIVE/PAUSED/TERMINATED state
//! machine, and cascading termination of registered descendants.
//!
//! Features:
//! - Three interchangeable channels: SSE push, HTTP polling, file drop
//! - Ed25519 / RSA-SHA256 / HMAC-SHA256 command signatures keyed by `kid`
//! - Fixed validation order with distinct rejection codes
//! - Leaves-first cascade in bounded-parallel batches with per-child timeout
//! - O(1) state reads for the policy engine's kill-switch stage
//!
//! # Example
//!
//! ```rust,ignore
//! use aigos_killswitch::{KillSwitchReceiver, spawn_receiver};
//!
//! let receiver = Arc::new(KillSwitchReceiver::new(config, (&identity).into(),
//!     keys, ReplayCache::default(), state, cascade, sink));
//! spawn_receiver(receiver, vec![sse_channel, file_channel], shutdown);
//! ```

pub mod cascade;
pub mod channels;
pub mod command;
pub mod receiver;
pub mod replay;
pub mod signature;
pub mod state;

pub use cascade::{CascadeConfig, CascadeManager, CascadeResult, ChildTerminator, FailedChild};
pub use channels::{file::FileChannel, poll::PollChannel, sse::SseChannel, ChannelError, CommandChannel};
pub use command::{signing_bytes, CommandRejection, CommandType, KillSwitchCommand};
pub use receiver::{
    run_channel, spawn_receiver, Applied, Backoff, KillSwitchReceiver, ReceiverConfig,
    TargetIdentity,
};
pub use replay::ReplayCache;
pub use signature::{
    generate_ed25519, sign_ed25519, sign_hs256, SignatureError, TrustedKey, TrustedKeyStore,
};
pub use state::{AgentState, KillSwitchState, Transition};
