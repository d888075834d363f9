use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// A stable hash over a node's payload only (spec.md §3, invariant I3) —
/// `internal` is never part of the input, so renaming/retiming a node never
/// perturbs its digest.
pub fn content_digest(payload: &Map<String, Value>) -> String {
    let canonical = serde_json::to_vec(payload).unwrap_or_default();
    hex::encode(Sha256::digest(&canonical))
}
