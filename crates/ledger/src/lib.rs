//! AIGOS-Ledger: Governance Event Ingestion & Integrity
//!
//! Per-organization append-only event log with per-event content hashing,
//! periodic Merkle-root integrity checkpoints, fixed-window rate limiting
//! with critical-event exemption, and the HTTP surface compliance and
//! security teams query to answer "which authorized request produced this
//! action".
//!
//! Features:
//! - Frozen [`event::GovernanceEvent`]s with canonical content hashes
//! - [`store::EventStore`] capability + in-memory reference implementation
//! - [`merkle::CheckpointSealer`] windowed integrity roots
//! - Sync and batch ingestion with per-event accept/reject results
//! - Bearer-credential org scoping; cross-org reads are 404, never 403

pub mod auth;
pub mod event;
pub mod http;
pub mod merkle;
pub mod policy;
pub mod ratelimit;
pub mod store;

pub use auth::{OrgResolver, StaticTokenMap};
pub use event::{Criticality, EventBuilder, GovernanceEvent};
pub use http::{router, AppState, LedgerConfig};
pub use merkle::{build_root, CheckpointSealer, MerkleCheckpoint, SealerConfig};
pub use policy::{FindingKind, IngestPolicy, IngestRule, PolicyFinding};
pub use ratelimit::{RateLimitConfig, RateLimitDecision, RateLimiter};
pub use store::{
    AssetSummary, EventFilter, EventSink, EventStore, MemoryEventStore, NullSink, RecordingSink,
    StoreError,
};
