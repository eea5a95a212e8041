//! Merkle integrity checkpoints.
//!
//! Periodically the ledger seals a window of events per organization:
//! leaves are the per-event `sha256:` hashes in append order, internal
//! nodes hash the concatenation of their two children's hex digests, odd
//! levels duplicate the last node, and an empty window collapses to the
//! hash of the empty string. A verifier holding a checkpoint can prove an
//! event was recorded without retaining the full log.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use aigos_identity::canonical::{sha256_hex, sha256_prefixed};

/// A sealed window root.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MerkleCheckpoint {
    pub org_id: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub leaf_count: usize,
    /// `sha256:<hex>` root over the window's leaves.
    pub root: String,
    /// Root of the previous window. Metadata only; never hashed into
    /// the next leaf list.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_root: Option<String>,
}

fn leaf_hex(leaf: &str) -> &str {
    leaf.strip_prefix("sha256:").unwrap_or(leaf)
}

/// Deterministic Merkle root over `leaves` (per-event hash values in time
/// order). `buildRoot([])` is the hash of the empty string.
pub fn build_root(leaves: &[String]) -> String {
    if leaves.is_empty() {
        return sha256_prefixed(b"");
    }
    let mut level: Vec<String> = leaves.iter().map(|l| leaf_hex(l).to_string()).collect();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let left = &pair[0];
            let right = pair.get(1).unwrap_or(left);
            let mut concat = String::with_capacity(left.len() + right.len());
            concat.push_str(left);
            concat.push_str(right);
            next.push(sha256_hex(concat.as_bytes()));
        }
        level = next;
    }
    format!("sha256:{}", level[0])
}

/// Window close policy: whichever of count or age trips first.
#[derive(Debug, Clone)]
pub struct SealerConfig {
    /// Seal after this many leaves.
    pub max_leaves: usize,
    /// Seal when the window is older than this, on the next observation.
    pub max_window: Duration,
}

impl Default for SealerConfig {
    fn default() -> Self {
        Self {
            max_leaves: 1_000,
            max_window: Duration::minutes(5),
        }
    }
}

#[derive(Debug)]
struct OrgWindow {
    started_at: DateTime<Utc>,
    leaves: Vec<String>,
    previous_root: Option<String>,
}

/// Accumulates event hashes per org and seals windows into checkpoints.
/// Appends arrive pre-serialized per org, so windows never span
/// out-of-order leaves.
#[derive(Debug)]
pub struct CheckpointSealer {
    config: SealerConfig,
    windows: HashMap<String, OrgWindow>,
    sealed: Vec<MerkleCheckpoint>,
}

impl CheckpointSealer {
    pub fn new(config: SealerConfig) -> Self {
        Self {
            config,
            windows: HashMap::new(),
            sealed: Vec::new(),
        }
    }

    /// Record one event hash. Returns the checkpoint if this observation
    /// closed the window.
    pub fn observe(
        &mut self,
        org_id: &str,
        event_hash: &str,
        now: DateTime<Utc>,
    ) -> Option<MerkleCheckpoint> {
        let window = self.windows.entry(org_id.to_string()).or_insert_with(|| OrgWindow {
            started_at: now,
            leaves: Vec::new(),
            previous_root: None,
        });
        window.leaves.push(event_hash.to_string());

        let count_tripped = window.leaves.len() >= self.config.max_leaves;
        let age_tripped = now - window.started_at >= self.config.max_window;
        if count_tripped || age_tripped {
            return Some(self.seal_org(org_id, now).expect("window exists"));
        }
        None
    }

    /// Force-seal one org's open window. `None` when nothing is open.
    pub fn seal_org(&mut self, org_id: &str, now: DateTime<Utc>) -> Option<MerkleCheckpoint> {
        let window = self.windows.get_mut(org_id)?;
        let checkpoint = MerkleCheckpoint {
            org_id: org_id.to_string(),
            window_start: window.started_at,
            window_end: now,
            leaf_count: window.leaves.len(),
            root: build_root(&window.leaves),
            previous_root: window.previous_root.clone(),
        };
        window.previous_root = Some(checkpoint.root.clone());
        window.leaves.clear();
        window.started_at = now;
        self.sealed.push(checkpoint.clone());
        Some(checkpoint)
    }

    /// Force-seal every open window, e.g. at shutdown.
    pub fn seal_all(&mut self, now: DateTime<Utc>) -> Vec<MerkleCheckpoint> {
        let orgs: Vec<String> = self
            .windows
            .iter()
            .filter(|(_, w)| !w.leaves.is_empty())
            .map(|(org, _)| org.clone())
            .collect();
        orgs.iter()
            .filter_map(|org| self.seal_org(org, now))
            .collect()
    }

    /// All checkpoints sealed so far, oldest first.
    pub fn checkpoints(&self) -> &[MerkleCheckpoint] {
        &self.sealed
    }
}
