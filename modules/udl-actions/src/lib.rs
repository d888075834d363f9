mod digest;

pub use digest::content_digest;

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use udl_common::UdlError;
use udl_core::{Node, NodeInternal, NodeStore};

/// Input to `NodeActions::create`. `owner` is intentionally absent — the
/// actions facade stamps it from its own binding, never from caller input
/// (spec.md §3 invariant I2).
#[derive(Debug, Clone)]
pub struct CreateNodeInput {
    pub id: String,
    pub node_type: String,
    pub parent: Option<String>,
    pub payload: Map<String, Value>,
}

/// Accepted shapes for `DeleteNode`: a bare id, a full node, or the thin
/// `{ internal: { id } }` wrapper seen on the wire (spec.md §4.4).
#[derive(Debug, Clone)]
pub enum DeleteInput {
    Id(String),
    Node(Node),
}

impl DeleteInput {
    fn resolve_id(&self) -> &str {
        match self {
            DeleteInput::Id(id) => id,
            DeleteInput::Node(node) => node.id(),
        }
    }
}

impl From<&str> for DeleteInput {
    fn from(id: &str) -> Self {
        DeleteInput::Id(id.to_string())
    }
}

impl From<String> for DeleteInput {
    fn from(id: String) -> Self {
        DeleteInput::Id(id)
    }
}

impl From<Node> for DeleteInput {
    fn from(node: Node) -> Self {
        DeleteInput::Node(node)
    }
}

impl TryFrom<Value> for DeleteInput {
    type Error = UdlError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::String(id) => Ok(DeleteInput::Id(id)),
            Value::Object(map) => {
                if let Some(id) = map.get("id").and_then(Value::as_str) {
                    return Ok(DeleteInput::Id(id.to_string()));
                }
                if let Some(id) = map
                    .get("internal")
                    .and_then(Value::as_object)
                    .and_then(|internal| internal.get("id"))
                    .and_then(Value::as_str)
                {
                    return Ok(DeleteInput::Id(id.to_string()));
                }
                serde_json::from_value::<Node>(Value::Object(map))
                    .map(DeleteInput::Node)
                    .map_err(|_| UdlError::Validation("delete input missing an id".into()))
            }
            _ => Err(UdlError::Validation(
                "delete input must be a string id, a node, or {internal:{id}}".into(),
            )),
        }
    }
}

const PROTECTED_PATCH_KEYS: &[&str] = &["id", "internal", "parent", "children"];

/// Owner-bound mutation facade over a `NodeStore` (spec.md §4.4). Every
/// write into the store goes through one of these three methods — nothing
/// else touches `NodeStore::put`/`delete` directly.
#[derive(Clone)]
pub struct NodeActions {
    store: Arc<NodeStore>,
    owner: String,
}

impl NodeActions {
    pub fn new(store: Arc<NodeStore>, owner: impl Into<String>) -> Self {
        Self {
            store,
            owner: owner.into(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Creates or replaces a node under this action's owner. Preserves
    /// `createdAt` across an update to the same id; always stamps `owner`
    /// from the binding, never from `input`.
    pub fn create(&self, input: CreateNodeInput) -> Result<Node, UdlError> {
        if input.id.is_empty() {
            return Err(UdlError::Validation("node id must not be empty".into()));
        }
        if input.node_type.is_empty() {
            return Err(UdlError::Validation("node type must not be empty".into()));
        }

        let now = Utc::now().timestamp_millis();
        let existing = self.store.get(&input.id);
        let created_at = existing.as_ref().map(|n| n.internal.created_at).unwrap_or(now);

        let node = Node {
            internal: NodeInternal {
                id: input.id,
                node_type: input.node_type,
                owner: self.owner.clone(),
                content_digest: content_digest(&input.payload),
                created_at,
                modified_at: now,
            },
            parent: input.parent,
            children: Vec::new(),
            payload: input.payload,
        };

        let id = node.id().to_string();
        self.store.put(node);
        Ok(self.store.get(&id).expect("just written"))
    }

    /// Shallow-merges `patch` into an existing node's payload. Rejects any
    /// key that would touch `id`, `internal`, `parent`, or `children`
    /// (spec.md §4.4).
    pub fn extend(&self, id: &str, patch: Map<String, Value>) -> Result<Node, UdlError> {
        for key in patch.keys() {
            if PROTECTED_PATCH_KEYS.contains(&key.as_str()) {
                return Err(UdlError::ProtectedField(key.clone()));
            }
        }

        let mut node = self.store.get(id).ok_or(UdlError::NotFound)?;
        for (key, value) in patch {
            node.payload.insert(key, value);
        }
        node.internal.content_digest = content_digest(&node.payload);
        node.internal.modified_at = Utc::now().timestamp_millis();

        self.store.put(node.clone());
        Ok(self.store.get(id).expect("just written"))
    }

    /// Deletes a node by id, full node, or `{internal:{id}}` wrapper.
    pub fn delete(&self, input: impl Into<DeleteInput>, cascade: bool) -> Result<(), UdlError> {
        let input = input.into();
        let id = input.resolve_id();
        if !self.store.delete(id, cascade) {
            return Err(UdlError::NotFound);
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Node> {
        self.store.get(id)
    }

    pub fn get_nodes(&self, predicate: Option<&dyn Fn(&Node) -> bool>) -> Vec<Node> {
        let all = self.store.all_nodes();
        match predicate {
            Some(f) => all.into_iter().filter(|n| f(n)).collect(),
            None => all,
        }
    }

    pub fn get_nodes_by_type(&self, node_type: &str, predicate: Option<&dyn Fn(&Node) -> bool>) -> Vec<Node> {
        let nodes = self.store.get_by_type(node_type);
        match predicate {
            Some(f) => nodes.into_iter().filter(|n| f(n)).collect(),
            None => nodes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input(id: &str, node_type: &str, payload: Map<String, Value>) -> CreateNodeInput {
        CreateNodeInput {
            id: id.to_string(),
            node_type: node_type.to_string(),
            parent: None,
            payload,
        }
    }

    #[test]
    fn create_stamps_owner_from_context_not_caller() {
        let store = Arc::new(NodeStore::new());
        let actions = NodeActions::new(store, "shop");

        let mut payload = Map::new();
        payload.insert("name".into(), json!("Widget"));
        let node = actions.create(input("p1", "Product", payload)).unwrap();

        assert_eq!(node.internal.owner, "shop");
    }

    #[test]
    fn create_preserves_created_at_on_update() {
        let store = Arc::new(NodeStore::new());
        let actions = NodeActions::new(store, "shop");

        let mut payload = Map::new();
        payload.insert("price".into(), json!(10));
        let first = actions.create(input("p1", "Product", payload.clone())).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(5));
        payload.insert("price".into(), json!(12));
        let second = actions.create(input("p1", "Product", payload)).unwrap();

        assert_eq!(first.internal.created_at, second.internal.created_at);
        assert!(second.internal.modified_at > first.internal.modified_at);
    }

    #[test]
    fn extend_preserves_internal_and_links() {
        let store = Arc::new(NodeStore::new());
        let actions = NodeActions::new(store, "shop");

        let mut payload = Map::new();
        payload.insert("price".into(), json!(10));
        let created = actions.create(input("p1", "Product", payload)).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(5));
        let mut patch = Map::new();
        patch.insert("category".into(), json!("toys"));
        let extended = actions.extend("p1", patch).unwrap();

        assert_eq!(extended.id(), created.id());
        assert_eq!(extended.node_type(), created.node_type());
        assert_eq!(extended.internal.owner, created.internal.owner);
        assert_eq!(extended.internal.created_at, created.internal.created_at);
        assert!(extended.internal.modified_at > created.internal.modified_at);
        assert_eq!(extended.field("price"), Some(&json!(10)));
        assert_eq!(extended.field("category"), Some(&json!("toys")));
    }

    #[test]
    fn extend_rejects_protected_fields() {
        let store = Arc::new(NodeStore::new());
        let actions = NodeActions::new(store, "shop");
        actions.create(input("p1", "Product", Map::new())).unwrap();

        let mut patch = Map::new();
        patch.insert("parent".into(), json!("other"));
        let err = actions.extend("p1", patch).unwrap_err();
        assert!(matches!(err, UdlError::ProtectedField(_)));
    }

    #[test]
    fn extend_missing_node_is_not_found() {
        let store = Arc::new(NodeStore::new());
        let actions = NodeActions::new(store, "shop");
        let err = actions.extend("ghost", Map::new()).unwrap_err();
        assert!(matches!(err, UdlError::NotFound));
    }

    #[test]
    fn delete_accepts_thin_wrapper() {
        let store = Arc::new(NodeStore::new());
        let actions = NodeActions::new(store, "shop");
        actions.create(input("p1", "Product", Map::new())).unwrap();

        let wrapper = json!({ "internal": { "id": "p1" } });
        let delete_input = DeleteInput::try_from(wrapper).unwrap();
        actions.delete(delete_input, false).unwrap();

        assert!(actions.get("p1").is_none());
    }

    #[test]
    fn delete_unknown_id_is_not_found() {
        let store = Arc::new(NodeStore::new());
        let actions = NodeActions::new(store, "shop");
        let err = actions.delete("ghost", false).unwrap_err();
        assert!(matches!(err, UdlError::NotFound));
    }
}
