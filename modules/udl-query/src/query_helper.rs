use std::collections::HashSet;

use serde_json::{Map, Value};
use thiserror::Error;

/// Error categories for the result-tuple contract (spec.md §4.10): this
/// helper never panics or throws, it only ever returns `Ok`/`Err`.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("network error: {0}")]
    Network(String),
    #[error("graphql error: {0:?}")]
    GraphQl(Vec<String>),
    #[error("unknown error: {0}")]
    Unknown(String),
}

pub type QueryResult = Result<Value, QueryError>;

/// Inserts `__typename` into every selection set of a GraphQL query
/// document (spec.md §4.10). This is a textual pass over `{`/`}` nesting
/// rather than a full AST rewrite — the query executor itself is out of
/// scope, this only needs to prepare what it sends.
pub fn inject_typename(query: &str) -> String {
    let mut out = String::with_capacity(query.len() + 32);
    let mut chars = query.chars().peekable();
    let mut depth_since_field = 0usize;

    while let Some(c) = chars.next() {
        out.push(c);
        if c == '{' {
            depth_since_field += 1;
            // Skip whitespace to see if the selection set is immediately closed
            // (an empty set never needs a typename).
            let rest: String = chars.clone().collect();
            let trimmed = rest.trim_start();
            if !trimmed.starts_with('}') {
                out.push_str(" __typename ");
            }
        } else if c == '}' {
            depth_since_field = depth_since_field.saturating_sub(1);
        }
    }
    let _ = depth_since_field;
    out
}

/// Extracts the single top-level field's value from a GraphQL response's
/// `data` object (`{ product: {...} }` -> `{...}`). Returns the input
/// unchanged if it isn't a single-key object (spec.md §4.10).
pub fn unwrap_root_field(data: &Value) -> Value {
    match data {
        Value::Object(map) if map.len() == 1 => map.values().next().cloned().unwrap_or(Value::Null),
        other => other.clone(),
    }
}

/// Replaces `{ "$ref": key }` placeholders with the corresponding entity
/// from `entities`, recursing into nested objects and arrays. A
/// visited-entity set prevents infinite recursion on circular data
/// (spec.md §4.10).
pub fn relink_entities(data: &Value, entities: &Map<String, Value>) -> Value {
    let mut visited = HashSet::new();
    relink_inner(data, entities, &mut visited)
}

fn relink_inner(value: &Value, entities: &Map<String, Value>, visited: &mut HashSet<String>) -> Value {
    match value {
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some(Value::String(key)) = map.get("$ref") {
                    if visited.contains(key) {
                        return Value::Null;
                    }
                    if let Some(entity) = entities.get(key) {
                        visited.insert(key.clone());
                        let resolved = relink_inner(entity, entities, visited);
                        visited.remove(key);
                        return resolved;
                    }
                    return Value::Null;
                }
            }
            let mut out = Map::new();
            for (k, v) in map {
                out.insert(k.clone(), relink_inner(v, entities, visited));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| relink_inner(v, entities, visited)).collect()),
        other => other.clone(),
    }
}

/// Normalizes a raw GraphQL HTTP response body into the result-tuple
/// contract: server-reported `errors` become `QueryError::GraphQl`;
/// otherwise `data` is relinked against `$entities` (if present) and
/// root-unwrapped.
pub fn normalize_response(body: &Value) -> QueryResult {
    if let Some(errors) = body.get("errors").and_then(Value::as_array) {
        if !errors.is_empty() {
            let messages = errors
                .iter()
                .filter_map(|e| e.get("message").and_then(Value::as_str).map(str::to_string))
                .collect();
            return Err(QueryError::GraphQl(messages));
        }
    }

    let data = body.get("data").cloned().unwrap_or(Value::Null);
    let relinked = match body.get("$entities").and_then(Value::as_object) {
        Some(entities) => relink_entities(&data, entities),
        None => data,
    };
    Ok(unwrap_root_field(&relinked))
}

/// Executes a GraphQL query against `endpoint`, applying typename
/// injection on the way out and the full response-normalization pipeline
/// on the way back (spec.md §4.10's "(error, data)" contract).
pub async fn execute_query(
    client: &reqwest::Client,
    endpoint: &str,
    query: &str,
    variables: Option<Value>,
) -> QueryResult {
    let body = serde_json::json!({
        "query": inject_typename(query),
        "variables": variables.unwrap_or_else(|| Value::Object(Map::new())),
    });

    let response = client
        .post(endpoint)
        .json(&body)
        .send()
        .await
        .map_err(|e| QueryError::Network(e.to_string()))?;

    if !response.status().is_success() {
        return Err(QueryError::Network(format!("http {}", response.status())));
    }

    let parsed: Value = response.json().await.map_err(|e| QueryError::Unknown(e.to_string()))?;
    normalize_response(&parsed)
}
