//! Golden Thread hashing and verification.
//!
//! The canonical Golden Thread form is UTF-8 JSON over exactly
//! `{ticket_id, approved_by, approved_at}` in that key order, no whitespace,
//! strings as given. Verification recomputes the hash and compares
//! byte-for-byte; the explicit key order makes the binding reproducible in
//! any language that touches the approval record.

use serde::Serialize;

use crate::canonical::sha256_prefixed;
use crate::types::GoldenThread;

/// Serialization shim pinning the normative key order. serde_json writes
/// struct fields in declaration order, which is the contract here.
#[derive(Serialize)]
struct CanonicalGoldenThread<'a> {
    ticket_id: &'a str,
    approved_by: &'a str,
    approved_at: &'a str,
}

/// Canonical byte string of a Golden Thread.
pub fn canonical_golden_thread(thread: &GoldenThread) -> String {
    serde_json::to_string(&CanonicalGoldenThread {
        ticket_id: &thread.ticket_id,
        approved_by: &thread.approved_by,
        approved_at: &thread.approved_at,
    })
    .expect("golden thread serialization")
}

/// `sha256:<64 hex>` over the canonical Golden Thread form.
pub fn compute_golden_thread_hash(thread: &GoldenThread) -> String {
    sha256_prefixed(canonical_golden_thread(thread).as_bytes())
}

/// Recompute the hash and compare byte-for-byte.
pub fn verify_golden_thread(thread: &GoldenThread, expected_hash: &str) -> bool {
    compute_golden_thread_hash(thread) == expected_hash
}
