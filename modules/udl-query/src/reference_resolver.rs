use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{Map, Value};
use udl_core::{index_key, Node, NodeStore};

/// A reference marker declaration (spec.md §3): `markerField` flags a
/// payload subobject as a link, `keyField` holds the foreign id, and
/// `candidateTypes` narrows which node types the id is allowed to resolve
/// against (empty means any type).
#[derive(Debug, Clone)]
pub struct ReferenceRule {
    pub marker_field: String,
    pub key_field: String,
    pub candidate_types: Vec<String>,
}

/// Query-time dereferencer for cross-node links (spec.md component #9). The
/// store itself never consults this — resolvers only run over a snapshot
/// already returned from `NodeStore`.
pub struct ReferenceResolver {
    store: Arc<NodeStore>,
    rules: Vec<ReferenceRule>,
}

impl ReferenceResolver {
    pub fn new(store: Arc<NodeStore>) -> Self {
        Self {
            store,
            rules: Vec::new(),
        }
    }

    pub fn register(&mut self, rule: ReferenceRule) {
        self.rules.push(rule);
    }

    /// Walks `value`, replacing any recognized reference marker with the
    /// resolved node's payload. A path-scoped visited-id set prevents
    /// infinite recursion on circular data.
    pub fn resolve(&self, value: &Value) -> Value {
        let mut visited = HashSet::new();
        self.resolve_inner(value, &mut visited)
    }

    fn resolve_inner(&self, value: &Value, visited: &mut HashSet<String>) -> Value {
        match value {
            Value::Object(map) => {
                if let Some(resolved) = self.try_resolve_marker(map, visited) {
                    return resolved;
                }
                let mut out = Map::new();
                for (k, v) in map {
                    out.insert(k.clone(), self.resolve_inner(v, visited));
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(items.iter().map(|v| self.resolve_inner(v, visited)).collect()),
            other => other.clone(),
        }
    }

    fn try_resolve_marker(&self, map: &Map<String, Value>, visited: &mut HashSet<String>) -> Option<Value> {
        for rule in &self.rules {
            if !is_truthy(map.get(&rule.marker_field)) {
                continue;
            }
            let Some(foreign_value) = map.get(&rule.key_field) else {
                continue;
            };
            let Some(foreign_key) = index_key(foreign_value) else {
                continue;
            };
            if visited.contains(&foreign_key) {
                return Some(Value::Null); // cycle: break rather than recurse forever
            }

            let Some(node) = self.lookup(rule, foreign_value) else {
                continue;
            };

            visited.insert(foreign_key);
            let resolved = self.resolve_inner(&Value::Object(node.payload.clone()), visited);
            visited.remove(&index_key(foreign_value).unwrap());
            return Some(resolved);
        }
        None
    }

    /// Asks the store for a node whose `(type, keyField, value)` index
    /// matches, trying each candidate type in turn until one hits (spec.md
    /// §4.9). An empty candidate list means any type is eligible.
    fn lookup(&self, rule: &ReferenceRule, value: &Value) -> Option<Node> {
        if rule.candidate_types.is_empty() {
            return self
                .store
                .all_nodes()
                .into_iter()
                .find(|n| n.field(&rule.key_field).and_then(index_key) == index_key(value));
        }
        rule.candidate_types
            .iter()
            .find_map(|candidate_type| self.store.get_by_field(candidate_type, &rule.key_field, value).into_iter().next())
    }
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use udl_core::{Node, NodeInternal};

    fn node(id: &str, node_type: &str, payload: Map<String, Value>) -> Node {
        Node {
            internal: NodeInternal {
                id: id.to_string(),
                node_type: node_type.to_string(),
                owner: "shop".into(),
                content_digest: "d".into(),
                created_at: 0,
                modified_at: 0,
            },
            parent: None,
            children: Vec::new(),
            payload,
        }
    }

    #[test]
    fn resolves_a_marked_reference_by_lookup_field_not_internal_id() {
        let store = Arc::new(NodeStore::new());
        let mut category_payload = Map::new();
        // "refId" here is the Category's own identifying attribute, looked
        // up by value — not the node's internal id, which is unrelated.
        category_payload.insert("refId".into(), json!("c1"));
        category_payload.insert("name".into(), json!("Toys"));
        store.put(node("internal-id-unrelated-to-lookup", "Category", category_payload));

        let mut resolver = ReferenceResolver::new(store);
        resolver.register(ReferenceRule {
            marker_field: "isRef".into(),
            key_field: "refId".into(),
            candidate_types: vec!["Category".to_string()],
        });

        let input = json!({ "isRef": true, "refId": "c1" });
        let resolved = resolver.resolve(&input);
        assert_eq!(resolved, json!({ "refId": "c1", "name": "Toys" }));
    }

    #[test]
    fn leaves_unmarked_values_untouched() {
        let store = Arc::new(NodeStore::new());
        let resolver = ReferenceResolver::new(store);
        let input = json!({ "title": "Widget", "price": 10 });
        assert_eq!(resolver.resolve(&input), input);
    }

    #[test]
    fn breaks_cycles_instead_of_recursing_forever() {
        let store = Arc::new(NodeStore::new());
        let mut payload_a = Map::new();
        payload_a.insert("refId".into(), json!("a"));
        payload_a.insert("ref".into(), json!({ "isRef": true, "refId": "b" }));
        store.put(node("a", "Thing", payload_a));

        let mut payload_b = Map::new();
        payload_b.insert("refId".into(), json!("b"));
        payload_b.insert("ref".into(), json!({ "isRef": true, "refId": "a" }));
        store.put(node("b", "Thing", payload_b));

        let mut resolver = ReferenceResolver::new(store);
        resolver.register(ReferenceRule {
            marker_field: "isRef".into(),
            key_field: "refId".into(),
            candidate_types: Vec::new(),
        });

        let input = json!({ "isRef": true, "refId": "a" });
        // Must terminate — a direct assertion is just that this returns.
        let _ = resolver.resolve(&input);
    }
}
