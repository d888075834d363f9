use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};
use udl_actions::NodeActions;
use udl_cache::{CacheEnvelope, CacheMeta, CacheStorage, CACHE_VERSION};
use udl_core::NodeStore;

use crate::plugin::{Plugin, UpdateStrategy};

/// Runs the four-stage lifecycle of spec.md §4.5 — cache hydrate, source,
/// reconcile, persist — across a configuration-ordered list of plugins.
pub struct SourcePipeline {
    store: Arc<NodeStore>,
    cache: Arc<dyn CacheStorage>,
    cache_enabled: bool,
}

impl SourcePipeline {
    pub fn new(store: Arc<NodeStore>, cache: Arc<dyn CacheStorage>, cache_enabled: bool) -> Self {
        Self {
            store,
            cache,
            cache_enabled,
        }
    }

    /// Plugins run sequentially, to completion, in the order given — cross-
    /// plugin references stay resolvable on first boot (spec.md §4.5, §5).
    pub async fn run(&self, plugins: &[Arc<dyn Plugin>]) {
        for plugin in plugins {
            self.run_one(plugin.as_ref()).await;
        }
    }

    async fn run_one(&self, plugin: &dyn Plugin) {
        let owner = plugin.name().to_string();

        self.hydrate(&owner).await;

        for (node_type, field) in plugin.indexes() {
            self.store.register_index(&node_type, &field);
        }

        let strategy = plugin.update_strategy();
        let live_before = self.owned_ids(&owner, strategy);

        let actions = NodeActions::new(self.store.clone(), owner.clone());
        if let Err(e) = plugin.source_nodes(&actions).await {
            // Failure isolation (spec.md §4.5, §7 PluginSourceFailure): the
            // partially-sourced state stays in the store, other plugins proceed.
            error!(plugin = %owner, error = %e, "plugin source failed, continuing with partial state");
        }

        self.reconcile(&owner, strategy, live_before);
        self.persist(&owner, plugin.indexes()).await;
    }

    async fn hydrate(&self, owner: &str) {
        if !self.cache_enabled {
            return;
        }
        let envelope = self.cache.load(owner).await;
        let node_count = envelope.nodes.len();
        for node in envelope.nodes {
            // The cache already carries the digest, so we bypass Node
            // Actions and put directly (spec.md §4.5 step 1).
            self.store.put(node);
        }
        for (node_type, fields) in envelope.indexes {
            for field in fields {
                self.store.register_index(&node_type, &field);
            }
        }
        self.store.replay_deletion_log(envelope.deletion_log);
        info!(owner, nodes = node_count, "hydrated from cache");
    }

    fn owned_ids(&self, owner: &str, strategy: UpdateStrategy) -> HashSet<String> {
        if strategy != UpdateStrategy::Refetch {
            return HashSet::new();
        }
        self.store
            .all_nodes()
            .into_iter()
            .filter(|n| n.internal.owner == owner)
            .map(|n| n.id().to_string())
            .collect()
    }

    /// For `refetch` plugins, diffs live-owned nodes before and after the
    /// source step and deletes anything that vanished (spec.md §4.5 step 3).
    fn reconcile(&self, owner: &str, strategy: UpdateStrategy, live_before: HashSet<String>) {
        if strategy != UpdateStrategy::Refetch {
            return;
        }
        let live_after = self.owned_ids(owner, strategy);
        let vanished: Vec<&String> = live_before.difference(&live_after).collect();
        if !vanished.is_empty() {
            info!(owner, count = vanished.len(), "refetch diff found vanished nodes");
        }
        for id in vanished {
            self.store.delete(id, false);
        }
        // These deletions are now implicit in the fresh snapshot.
        self.store.compact_deletion_log(owner);
    }

    async fn persist(&self, owner: &str, declared_indexes: Vec<(String, String)>) {
        if !self.cache_enabled {
            return;
        }
        let nodes: Vec<_> = self
            .store
            .all_nodes()
            .into_iter()
            .filter(|n| n.internal.owner == owner)
            .collect();

        let mut indexes: HashMap<String, Vec<String>> = HashMap::new();
        for (node_type, field) in declared_indexes {
            indexes.entry(node_type).or_default().push(field);
        }

        let deletion_log = self.store.deletion_log_entries_for_owner(owner);
        let now = Utc::now();
        let envelope = CacheEnvelope {
            nodes,
            indexes,
            deletion_log,
            meta: CacheMeta {
                version: CACHE_VERSION,
                created_at: now,
                updated_at: now,
            },
        };

        if let Err(e) = self.cache.save(owner, &envelope).await {
            warn!(owner, error = %e, "cache save failed, continuing without persistence");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Map};
    use udl_actions::CreateNodeInput;
    use udl_cache::FilesystemCacheStorage;
    use udl_common::UdlError;

    struct DemoPlugin;

    #[async_trait]
    impl Plugin for DemoPlugin {
        fn name(&self) -> &str {
            "demo"
        }

        fn indexes(&self) -> Vec<(String, String)> {
            vec![("Product".to_string(), "sku".to_string())]
        }

        async fn source_nodes(&self, actions: &NodeActions) -> Result<(), UdlError> {
            let mut payload = Map::new();
            payload.insert("sku".into(), json!("AB-1"));
            actions.create(CreateNodeInput {
                id: "p1".into(),
                node_type: "Product".into(),
                parent: None,
                payload,
            })?;
            Ok(())
        }
    }

    struct FailingPlugin;

    #[async_trait]
    impl Plugin for FailingPlugin {
        fn name(&self) -> &str {
            "broken"
        }

        async fn source_nodes(&self, _actions: &NodeActions) -> Result<(), UdlError> {
            Err(UdlError::PluginSourceFailure("boom".into()))
        }
    }

    #[tokio::test]
    async fn sources_nodes_and_persists_cache() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(NodeStore::new());
        let cache: Arc<dyn CacheStorage> = Arc::new(FilesystemCacheStorage::new(dir.path()));
        let pipeline = SourcePipeline::new(store.clone(), cache.clone(), true);

        let plugins: Vec<Arc<dyn Plugin>> = vec![Arc::new(DemoPlugin)];
        pipeline.run(&plugins).await;

        let found = store.get_by_field("Product", "sku", &json!("AB-1"));
        assert_eq!(found.len(), 1);

        let envelope = cache.load("demo").await;
        assert_eq!(envelope.nodes.len(), 1);
        assert_eq!(envelope.indexes.get("Product"), Some(&vec!["sku".to_string()]));
    }

    #[tokio::test]
    async fn one_plugin_failure_does_not_abort_others() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(NodeStore::new());
        let cache: Arc<dyn CacheStorage> = Arc::new(FilesystemCacheStorage::new(dir.path()));
        let pipeline = SourcePipeline::new(store.clone(), cache, true);

        let plugins: Vec<Arc<dyn Plugin>> = vec![Arc::new(FailingPlugin), Arc::new(DemoPlugin)];
        pipeline.run(&plugins).await;

        assert!(store.get("p1").is_some());
    }

    #[tokio::test]
    async fn refetch_reconcile_deletes_vanished_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(NodeStore::new());
        let cache: Arc<dyn CacheStorage> = Arc::new(FilesystemCacheStorage::new(dir.path()));
        let actions = NodeActions::new(store.clone(), "demo".to_string());
        actions
            .create(CreateNodeInput {
                id: "stale".into(),
                node_type: "Product".into(),
                parent: None,
                payload: Map::new(),
            })
            .unwrap();

        let pipeline = SourcePipeline::new(store.clone(), cache, false);
        let plugins: Vec<Arc<dyn Plugin>> = vec![Arc::new(DemoPlugin)];
        pipeline.run(&plugins).await;

        assert!(store.get("stale").is_none(), "refetch diff should delete nodes the plugin no longer sources");
        assert!(store.get("p1").is_some());
    }
}
