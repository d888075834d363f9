use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One deletion-log entry (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeletionLogEntry {
    pub node_id: String,
    pub node_type: String,
    pub owner: String,
    pub deleted_at: DateTime<Utc>,
}

/// Append-only deletion record, bounded by per-owner compaction (spec.md
/// §4.2). Consumers only ever see snapshots (`Vec<DeletionLogEntry>` clones);
/// they never get a handle that lets them mutate the log directly.
#[derive(Debug, Default)]
pub struct DeletionLog {
    entries: Vec<DeletionLogEntry>,
}

impl DeletionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore entries from a cache envelope's deletion log (spec.md §4.5
    /// step 1: "replay the deletion log into the in-memory log").
    pub fn replay(&mut self, entries: Vec<DeletionLogEntry>) {
        self.entries.extend(entries);
    }

    pub fn record(&mut self, node_id: String, node_type: String, owner: String) {
        self.entries.push(DeletionLogEntry {
            node_id,
            node_type,
            owner,
            deleted_at: Utc::now(),
        });
    }

    /// Entries strictly newer than `since`, optionally filtered by owner.
    pub fn since(&self, since: DateTime<Utc>, owner_filter: Option<&str>) -> Vec<DeletionLogEntry> {
        self.entries
            .iter()
            .filter(|e| e.deleted_at > since)
            .filter(|e| owner_filter.map(|o| o == e.owner).unwrap_or(true))
            .cloned()
            .collect()
    }

    /// Remove entries owned by `owner` — called after that plugin's
    /// successful full re-source, when those deletions are now implicit in
    /// the fresh set (spec.md §4.2, §4.5 step 4).
    pub fn compact(&mut self, owner: &str) {
        self.entries.retain(|e| e.owner != owner);
    }

    /// Snapshot of every entry owned by `owner`, for cache persistence.
    pub fn entries_for_owner(&self, owner: &str) -> Vec<DeletionLogEntry> {
        self.entries
            .iter()
            .filter(|e| e.owner == owner)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn since_filters_by_time_and_owner() {
        let mut log = DeletionLog::new();
        log.record("a".into(), "Product".into(), "shop".into());
        let cutoff = Utc::now();
        std::thread::sleep(std::time::Duration::from_millis(5));
        log.record("b".into(), "Product".into(), "other".into());

        let all = log.since(cutoff, None);
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].node_id, "b");

        let filtered = log.since(cutoff - chrono::Duration::seconds(1), Some("shop"));
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].node_id, "a");
    }

    #[test]
    fn compact_removes_only_owner_entries() {
        let mut log = DeletionLog::new();
        log.record("a".into(), "Product".into(), "shop".into());
        log.record("b".into(), "Product".into(), "other".into());
        log.compact("shop");
        assert_eq!(log.len(), 1);
        assert_eq!(log.entries_for_owner("other").len(), 1);
    }
}
