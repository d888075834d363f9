use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::deletion_log::{DeletionLog, DeletionLogEntry};
use crate::events::{EventBus, NodeEvent};
use crate::node::{index_key, Node};

type IndexKeyMap = HashMap<String, HashSet<String>>;

#[derive(Default)]
struct Inner {
    primary: HashMap<String, Node>,
    /// Insertion-ordered id lists per type. Deterministic within one process
    /// lifetime, per spec.md §4.1 (`GetByType`).
    type_buckets: HashMap<String, Vec<String>>,
    /// `(type, field) -> value -> ids`. A pure projection of `primary` (I5) —
    /// never consulted as a source of truth.
    indexes: HashMap<(String, String), IndexKeyMap>,
    /// `type -> registered field names`.
    registered_indexes: HashMap<String, HashSet<String>>,
    deletion_log: DeletionLog,
}

/// The Node Graph: an in-memory, indexed, multi-owner node store (spec.md
/// §4.1). All mutating operations execute under a single logical writer
/// (`parking_lot::RwLock`); returned collections are defensive copies so
/// callers can iterate without synchronizing with the writer (spec.md §5).
pub struct NodeStore {
    inner: RwLock<Inner>,
    events: EventBus,
}

impl Default for NodeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            events: EventBus::default(),
        }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    /// Insert or replace a node. See spec.md §4.1 for the full contract:
    /// index reconciliation, bidirectional parent/child links, and
    /// digest-equal no-ops.
    pub fn put(&self, mut node: Node) {
        if node.internal.id.is_empty() || node.internal.node_type.is_empty() {
            // Malformed input is a programmer error (spec.md §4.1 failure
            // semantics), not a recoverable condition.
            panic!("NodeStore::put: node must have a non-empty id and type");
        }

        let id = node.internal.id.clone();
        let mut inner = self.inner.write();

        let prev = inner.primary.get(&id).cloned();
        if let Some(prev) = &prev {
            if prev.internal.content_digest == node.internal.content_digest {
                debug!(id = %id, "put: digest-equal, no-op");
                return;
            }
            remove_from_indexes(&mut inner, prev);
            reconcile_type_bucket(&mut inner, &id, &prev.node_type(), node.node_type());
        } else {
            inner
                .type_buckets
                .entry(node.node_type().to_string())
                .or_default()
                .push(id.clone());
        }

        let old_parent = prev.as_ref().and_then(|p| p.parent.as_deref());
        reconcile_parent_links(&mut inner, old_parent, node.parent.as_deref(), &id);

        // Children are store-maintained (I4), never caller-supplied.
        node.children = prev.as_ref().map(|p| p.children.clone()).unwrap_or_default();

        add_to_indexes(&mut inner, &node);

        let event = if prev.is_some() {
            NodeEvent::Updated(node.clone())
        } else {
            NodeEvent::Created(node.clone())
        };
        inner.primary.insert(id, node);

        drop(inner);
        self.events.emit(event);
    }

    pub fn get(&self, id: &str) -> Option<Node> {
        self.inner.read().primary.get(id).cloned()
    }

    /// Every node in the store, regardless of type — backs `GetNodes`
    /// (spec.md §4.4), which filters by predicate rather than type.
    pub fn all_nodes(&self) -> Vec<Node> {
        self.inner.read().primary.values().cloned().collect()
    }

    pub fn get_by_type(&self, node_type: &str) -> Vec<Node> {
        let inner = self.inner.read();
        inner
            .type_buckets
            .get(node_type)
            .map(|ids| ids.iter().filter_map(|id| inner.primary.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    /// O(1) if `(type, field)` is registered, else a linear scan over the
    /// type bucket (spec.md §4.1).
    pub fn get_by_field(&self, node_type: &str, field: &str, value: &serde_json::Value) -> Vec<Node> {
        let inner = self.inner.read();
        let is_registered = inner
            .registered_indexes
            .get(node_type)
            .map(|fields| fields.contains(field))
            .unwrap_or(false);

        if is_registered {
            let Some(key) = index_key(value) else { return Vec::new() };
            inner
                .indexes
                .get(&(node_type.to_string(), field.to_string()))
                .and_then(|m| m.get(&key))
                .map(|ids| ids.iter().filter_map(|id| inner.primary.get(id).cloned()).collect())
                .unwrap_or_default()
        } else {
            let Some(key) = index_key(value) else { return Vec::new() };
            inner
                .type_buckets
                .get(node_type)
                .map(|ids| {
                    ids.iter()
                        .filter_map(|id| inner.primary.get(id))
                        .filter(|n| n.field(field).and_then(index_key) == Some(key.clone()))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        }
    }

    /// Declare an index and backfill it once over the existing type bucket
    /// (spec.md §4.1).
    pub fn register_index(&self, node_type: &str, field: &str) {
        let mut inner = self.inner.write();
        let already = inner
            .registered_indexes
            .get(node_type)
            .map(|f| f.contains(field))
            .unwrap_or(false);
        if already {
            return;
        }
        inner
            .registered_indexes
            .entry(node_type.to_string())
            .or_default()
            .insert(field.to_string());

        let ids = inner.type_buckets.get(node_type).cloned().unwrap_or_default();
        for id in ids {
            if let Some(node) = inner.primary.get(&id).cloned() {
                if let Some(value) = node.field(field) {
                    if let Some(key) = index_key(value) {
                        inner
                            .indexes
                            .entry((node_type.to_string(), field.to_string()))
                            .or_default()
                            .entry(key)
                            .or_default()
                            .insert(id);
                    }
                }
            }
        }
    }

    /// Delete a node. Idempotent: deleting an unknown id returns `false`
    /// with no side effects (spec.md §4.1).
    pub fn delete(&self, id: &str, cascade: bool) -> bool {
        let mut inner = self.inner.write();
        if !inner.primary.contains_key(id) {
            return false;
        }

        let mut to_delete = vec![id.to_string()];
        if cascade {
            collect_descendants(&inner, id, &mut to_delete);
        }

        let mut events = Vec::new();
        // Delete children-first is not required; order only matters for the
        // parent-children edge updates below, which we do per-node.
        for did in &to_delete {
            let Some(node) = inner.primary.remove(did) else { continue };
            remove_from_indexes(&mut inner, &node);
            if let Some(bucket) = inner.type_buckets.get_mut(node.node_type()) {
                bucket.retain(|x| x != did);
            }
            if let Some(parent_id) = &node.parent {
                if let Some(parent) = inner.primary.get_mut(parent_id) {
                    parent.children.retain(|c| c != did);
                }
            }
            if !cascade {
                for child_id in &node.children {
                    if let Some(child) = inner.primary.get_mut(child_id) {
                        child.parent = None;
                    }
                }
            }
            inner
                .deletion_log
                .record(did.clone(), node.node_type().to_string(), node.internal.owner.clone());
            events.push(NodeEvent::Deleted {
                id: did.clone(),
                node_type: node.node_type().to_string(),
                owner: node.internal.owner.clone(),
            });
        }

        drop(inner);
        for event in events {
            self.events.emit(event);
        }
        true
    }

    pub fn deletion_log_since(
        &self,
        since: chrono::DateTime<chrono::Utc>,
        owner_filter: Option<&str>,
    ) -> Vec<DeletionLogEntry> {
        self.inner.read().deletion_log.since(since, owner_filter)
    }

    pub fn deletion_log_entries_for_owner(&self, owner: &str) -> Vec<DeletionLogEntry> {
        self.inner.read().deletion_log.entries_for_owner(owner)
    }

    pub fn compact_deletion_log(&self, owner: &str) {
        self.inner.write().deletion_log.compact(owner);
    }

    pub fn replay_deletion_log(&self, entries: Vec<DeletionLogEntry>) {
        self.inner.write().deletion_log.replay(entries);
    }

    pub fn registered_fields(&self, node_type: &str) -> Vec<String> {
        self.inner
            .read()
            .registered_indexes
            .get(node_type)
            .map(|f| f.iter().cloned().collect())
            .unwrap_or_default()
    }
}

fn reconcile_type_bucket(inner: &mut Inner, id: &str, old_type: &str, new_type: &str) {
    if old_type == new_type {
        return;
    }
    if let Some(bucket) = inner.type_buckets.get_mut(old_type) {
        bucket.retain(|x| x != id);
    }
    inner
        .type_buckets
        .entry(new_type.to_string())
        .or_default()
        .push(id.to_string());
    warn!(id, old_type, new_type, "node changed type across a put");
}

fn reconcile_parent_links(inner: &mut Inner, old_parent: Option<&str>, new_parent: Option<&str>, child_id: &str) {
    if old_parent == new_parent {
        return;
    }
    if let Some(op) = old_parent {
        if let Some(p) = inner.primary.get_mut(op) {
            p.children.retain(|c| c != child_id);
        }
    }
    if let Some(np) = new_parent {
        if let Some(p) = inner.primary.get_mut(np) {
            if !p.children.iter().any(|c| c == child_id) {
                p.children.push(child_id.to_string());
            }
        }
    }
    // A missing parent is not an error — the child's `parent` field is
    // retained unchanged and reconciled when the parent eventually arrives.
}

fn add_to_indexes(inner: &mut Inner, node: &Node) {
    let Some(fields) = inner.registered_indexes.get(node.node_type()).cloned() else {
        return;
    };
    for field in fields {
        if let Some(value) = node.field(&field) {
            if let Some(key) = index_key(value) {
                inner
                    .indexes
                    .entry((node.node_type().to_string(), field))
                    .or_default()
                    .entry(key)
                    .or_default()
                    .insert(node.id().to_string());
            }
        }
    }
}

fn remove_from_indexes(inner: &mut Inner, node: &Node) {
    let Some(fields) = inner.registered_indexes.get(node.node_type()).cloned() else {
        return;
    };
    for field in fields {
        if let Some(value) = node.field(&field) {
            if let Some(key) = index_key(value) {
                if let Some(values) = inner.indexes.get_mut(&(node.node_type().to_string(), field)) {
                    if let Some(ids) = values.get_mut(&key) {
                        ids.remove(node.id());
                    }
                }
            }
        }
    }
}

/// Depth-first, cycle-safe collection of a node's descendants for cascade
/// delete (spec.md §4.1).
fn collect_descendants(inner: &Inner, root: &str, acc: &mut Vec<String>) {
    let mut visited: HashSet<String> = acc.iter().cloned().collect();
    let mut stack = inner
        .primary
        .get(root)
        .map(|n| n.children.clone())
        .unwrap_or_default();

    while let Some(id) = stack.pop() {
        if !visited.insert(id.clone()) {
            continue;
        }
        if let Some(node) = inner.primary.get(&id) {
            stack.extend(node.children.clone());
        }
        acc.push(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(id: &str, node_type: &str, owner: &str, digest: &str, parent: Option<&str>) -> Node {
        Node {
            internal: crate::node::NodeInternal {
                id: id.to_string(),
                node_type: node_type.to_string(),
                owner: owner.to_string(),
                content_digest: digest.to_string(),
                created_at: 0,
                modified_at: 0,
            },
            parent: parent.map(str::to_string),
            children: Vec::new(),
            payload: serde_json::Map::new(),
        }
    }

    #[test]
    fn create_and_read_by_field() {
        let store = NodeStore::new();
        store.register_index("Product", "name");
        let mut n = node("p1", "Product", "shop", "d1", None);
        n.payload.insert("name".into(), json!("Widget"));
        n.payload.insert("price".into(), json!(10));
        store.put(n);

        let found = store.get_by_field("Product", "name", &json!("Widget"));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id(), "p1");
        assert_eq!(found[0].field("price"), Some(&json!(10)));
    }

    #[test]
    fn cascade_delete_removes_parent_and_child() {
        let store = NodeStore::new();
        store.put(node("c1", "Category", "shop", "d1", None));
        store.put(node("p1", "Product", "shop", "d2", Some("c1")));

        assert_eq!(store.get("c1").unwrap().children, vec!["p1".to_string()]);

        let deleted = store.delete("c1", true);
        assert!(deleted);
        assert!(store.get("c1").is_none());
        assert!(store.get("p1").is_none());
        assert_eq!(store.deletion_log_entries_for_owner("shop").len(), 2);
    }

    #[test]
    fn non_cascade_delete_clears_child_parent() {
        let store = NodeStore::new();
        store.put(node("c1", "Category", "shop", "d1", None));
        store.put(node("p1", "Product", "shop", "d2", Some("c1")));

        store.delete("c1", false);
        assert!(store.get("c1").is_none());
        let child = store.get("p1").unwrap();
        assert_eq!(child.parent, None);
    }

    #[test]
    fn digest_equal_put_is_noop() {
        let store = NodeStore::new();
        let mut rx = store.subscribe();
        store.put(node("p1", "Product", "shop", "d1", None));
        let _ = rx.try_recv().unwrap();

        store.put(node("p1", "Product", "shop", "d1", None));
        assert!(rx.try_recv().is_err(), "no event should fire for a digest-equal put");
    }

    #[test]
    fn missing_parent_is_not_an_error() {
        let store = NodeStore::new();
        store.put(node("p1", "Product", "shop", "d1", Some("ghost")));
        let n = store.get("p1").unwrap();
        assert_eq!(n.parent.as_deref(), Some("ghost"));
    }

    #[test]
    fn delete_unknown_id_is_idempotent() {
        let store = NodeStore::new();
        assert!(!store.delete("nope", false));
    }

    #[test]
    fn register_index_backfills_existing_nodes() {
        let store = NodeStore::new();
        let mut n = node("p1", "Product", "shop", "d1", None);
        n.payload.insert("sku".into(), json!("AB-1"));
        store.put(n);

        store.register_index("Product", "sku");
        let found = store.get_by_field("Product", "sku", &json!("AB-1"));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id(), "p1");
    }
}
