use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tracing::warn;
use udl_common::UdlError;

use crate::envelope::{CacheEnvelope, CACHE_VERSION};

/// A `{sanitized}` sentinel beyond this nesting depth. Our envelope is built
/// from owned `serde_json::Value` trees, which cannot contain true reference
/// cycles (unlike the mutable-graph source this spec was distilled from) —
/// the practical analog is pathologically deep payloads threatening a stack
/// overflow on (de)serialization, which this guards against instead.
const MAX_PAYLOAD_DEPTH: usize = 64;
const CYCLE_SENTINEL: &str = "[truncated: payload exceeded max nesting depth]";

/// Pluggable persistence backend for per-owner cache envelopes (spec.md
/// §4.3: "a `CacheStorage` abstraction is exposed so plugins may substitute
/// an alternative backend").
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Never fails: an absent, unparseable, or version-mismatched cache is
    /// advisory data loss, not an error (spec.md §4.3).
    async fn load(&self, owner: &str) -> CacheEnvelope;

    async fn save(&self, owner: &str, envelope: &CacheEnvelope) -> Result<(), UdlError>;
}

/// Default backend: `<cacheDir>/<owner>/nodes.json`, atomic tmp-file +
/// fsync + rename (spec.md §4.3).
pub struct FilesystemCacheStorage {
    root: PathBuf,
}

impl FilesystemCacheStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn owner_dir(&self, owner: &str) -> PathBuf {
        self.root.join(owner)
    }

    fn envelope_path(&self, owner: &str) -> PathBuf {
        self.owner_dir(owner).join("nodes.json")
    }
}

#[async_trait]
impl CacheStorage for FilesystemCacheStorage {
    async fn load(&self, owner: &str) -> CacheEnvelope {
        let path = self.envelope_path(owner);
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return CacheEnvelope::empty(),
            Err(e) => {
                warn!(owner, path = %path.display(), error = %e, "cache load failed, treating as empty");
                return CacheEnvelope::empty();
            }
        };

        let envelope: CacheEnvelope = match serde_json::from_slice(&bytes) {
            Ok(e) => e,
            Err(e) => {
                warn!(owner, error = %e, "cache file unparseable, discarding");
                return CacheEnvelope::empty();
            }
        };

        if envelope.meta.version != CACHE_VERSION {
            warn!(
                owner,
                found = envelope.meta.version,
                expected = CACHE_VERSION,
                "cache version mismatch, discarding"
            );
            return CacheEnvelope::empty();
        }

        envelope
    }

    async fn save(&self, owner: &str, envelope: &CacheEnvelope) -> Result<(), UdlError> {
        let dir = self.owner_dir(owner);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| UdlError::TransientIo(format!("create cache dir: {e}")))?;

        let mut sanitized = serde_json::to_value(envelope)
            .map_err(|e| UdlError::TransientIo(format!("serialize cache envelope: {e}")))?;
        sanitize_depth(&mut sanitized, 0);
        let bytes = serde_json::to_vec_pretty(&sanitized)
            .map_err(|e| UdlError::TransientIo(format!("encode cache envelope: {e}")))?;

        let final_path = self.envelope_path(owner);
        let tmp_path = dir.join("nodes.json.tmp");

        let mut file = tokio::fs::File::create(&tmp_path)
            .await
            .map_err(|e| UdlError::TransientIo(format!("create tmp cache file: {e}")))?;
        file.write_all(&bytes)
            .await
            .map_err(|e| UdlError::TransientIo(format!("write tmp cache file: {e}")))?;
        file.sync_all()
            .await
            .map_err(|e| UdlError::TransientIo(format!("fsync tmp cache file: {e}")))?;
        drop(file);

        tokio::fs::rename(&tmp_path, &final_path)
            .await
            .map_err(|e| UdlError::TransientIo(format!("rename cache file: {e}")))?;

        Ok(())
    }
}

/// Replaces any subtree past `MAX_PAYLOAD_DEPTH` with a sentinel string, in
/// place. Best-effort data rescue, not a correctness feature (spec.md §9).
fn sanitize_depth(value: &mut Value, depth: usize) {
    if depth >= MAX_PAYLOAD_DEPTH {
        if matches!(value, Value::Object(_) | Value::Array(_)) {
            *value = Value::String(CYCLE_SENTINEL.to_string());
        }
        return;
    }
    match value {
        Value::Array(items) => {
            for item in items {
                sanitize_depth(item, depth + 1);
            }
        }
        Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                sanitize_depth(v, depth + 1);
            }
        }
        _ => {}
    }
}

pub fn default_owner_dir(cache_dir: &Path, owner: &str) -> PathBuf {
    cache_dir.join(owner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use udl_core::{Node, NodeInternal};

    fn sample_node(id: &str) -> Node {
        Node {
            internal: NodeInternal {
                id: id.to_string(),
                node_type: "Product".into(),
                owner: "demo".into(),
                content_digest: "d1".into(),
                created_at: 0,
                modified_at: 0,
            },
            parent: None,
            children: Vec::new(),
            payload: serde_json::Map::new(),
        }
    }

    #[tokio::test]
    async fn round_trips_an_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FilesystemCacheStorage::new(dir.path());

        let mut envelope = CacheEnvelope::empty();
        envelope.nodes.push(sample_node("p1"));
        envelope.indexes.insert("Product".into(), vec!["sku".into()]);

        storage.save("demo", &envelope).await.unwrap();
        let loaded = storage.load("demo").await;

        assert_eq!(loaded.nodes.len(), 1);
        assert_eq!(loaded.nodes[0].id(), "p1");
        assert_eq!(loaded.indexes.get("Product"), Some(&vec!["sku".to_string()]));
    }

    #[tokio::test]
    async fn missing_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FilesystemCacheStorage::new(dir.path());
        let loaded = storage.load("nobody-home").await;
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn unparseable_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let owner_dir = dir.path().join("demo");
        tokio::fs::create_dir_all(&owner_dir).await.unwrap();
        tokio::fs::write(owner_dir.join("nodes.json"), b"not json")
            .await
            .unwrap();

        let storage = FilesystemCacheStorage::new(dir.path());
        let loaded = storage.load("demo").await;
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn version_mismatch_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let owner_dir = dir.path().join("demo");
        tokio::fs::create_dir_all(&owner_dir).await.unwrap();
        let mut stale = CacheEnvelope::empty();
        stale.meta.version = 999;
        tokio::fs::write(
            owner_dir.join("nodes.json"),
            serde_json::to_vec(&stale).unwrap(),
        )
        .await
        .unwrap();

        let storage = FilesystemCacheStorage::new(dir.path());
        let loaded = storage.load("demo").await;
        assert!(loaded.is_empty());
    }

    #[test]
    fn sanitize_truncates_past_max_depth() {
        let mut value = serde_json::json!({"a": {"b": {"c": 1}}});
        sanitize_depth(&mut value, MAX_PAYLOAD_DEPTH - 1);
        assert_eq!(value["a"]["b"], Value::String(CYCLE_SENTINEL.to_string()));
    }
}
