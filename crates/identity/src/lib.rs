//! AIGOS-Identity: Runtime Identity & Golden Thread
//!
//! Mints and verifies the durable identity that ties a running agent
//! instance to the signed business approval authorizing its existence.
//!
//! Features:
//! - Golden Thread hashing over a canonical byte string
//! - Capability manifests with decay/inherit/explicit spawn modes
//! - Lineage tracking (root, ancestor chain, generation depth)
//! - Tool and domain pattern matching shared by the policy engine
//!
//! # Example
//!
//! ```rust,ignore
//! use aigos_identity::{IdentityFactory, AssetRecord};
//!
//! let factory = IdentityFactory::new();
//! let identity = factory.create(&asset, None)?;
//! assert!(identity.verified);
//!
//! let child = factory.spawn_child(&identity, None)?;
//! assert_eq!(child.lineage.generation_depth, 1);
//! ```

pub mod canonical;
pub mod capability;
pub mod factory;
pub mod golden_thread;
pub mod patterns;
pub mod types;

pub use canonical::{canonical_json, sha256_prefixed};
pub use capability::{child_manifest, CapabilityError};
pub use factory::{AssetRecord, CapabilityOverrides, IdentityError, IdentityFactory, VerificationReport};
pub use golden_thread::{compute_golden_thread_hash, verify_golden_thread};
pub use patterns::{matches_domain, matches_tool, Pattern, PatternError};
pub use types::{
    AgentMode, CapabilitiesManifest, CapabilityMode, GoldenThread, Lineage, RiskLevel,
    RuntimeIdentity,
};
