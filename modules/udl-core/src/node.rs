use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The envelope every node carries regardless of payload (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeInternal {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub owner: String,
    pub content_digest: String,
    pub created_at: i64,
    pub modified_at: i64,
}

/// A node in the graph: envelope, optional parent/child links, free-form payload.
///
/// Invariants (spec.md §3): `id` unique across the store (I1, enforced by the
/// store's primary map), `owner` set only by the owning action context (I2,
/// enforced by `udl-actions`), `content_digest` stable over payload only (I3),
/// parent/children maintained pairwise (I4, enforced by `NodeStore::put` and
/// `::delete`), indexes are a pure projection (I5, enforced by `NodeStore`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub internal: NodeInternal,
    pub parent: Option<String>,
    #[serde(default)]
    pub children: Vec<String>,
    pub payload: Map<String, Value>,
}

impl Node {
    pub fn id(&self) -> &str {
        &self.internal.id
    }

    pub fn node_type(&self) -> &str {
        &self.internal.node_type
    }

    /// Read a top-level payload field, used by index lookups and the
    /// default webhook handler's `idField` matching.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.payload.get(name)
    }
}

/// Canonical string form of a JSON scalar used as an index key.
///
/// Spec.md's default webhook handler requires "numeric/string coercion for
/// JSON-transported numeric ids" — stringifying scalars before hashing gives
/// that coercion for free: `42` and `"42"` both become `"42"`.
pub fn index_key(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(_) | Value::Object(_) => None,
    }
}
