use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use udl_core::{DeletionLogEntry, Node};

/// On-disk format version. Bumping this discards every existing cache file
/// on next load (spec.md §6: "cache version is an integer; mismatches cause
/// silent discard on load").
pub const CACHE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMeta {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The persisted form of one owner's partition of the store (spec.md §3, §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEnvelope {
    pub nodes: Vec<Node>,
    /// `type -> registered field names`, so indexes can be re-declared
    /// (and backfilled) on hydrate without the plugin repeating itself.
    pub indexes: HashMap<String, Vec<String>>,
    pub deletion_log: Vec<DeletionLogEntry>,
    pub meta: CacheMeta,
}

impl CacheEnvelope {
    pub fn empty() -> Self {
        let now = Utc::now();
        Self {
            nodes: Vec::new(),
            indexes: HashMap::new(),
            deletion_log: Vec::new(),
            meta: CacheMeta {
                version: CACHE_VERSION,
                created_at: now,
                updated_at: now,
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.deletion_log.is_empty()
    }
}

impl Default for CacheEnvelope {
    fn default() -> Self {
        Self::empty()
    }
}
