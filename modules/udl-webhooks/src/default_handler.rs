use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use udl_actions::CreateNodeInput;
use udl_common::UdlError;
use udl_core::index_key;

use crate::registry::{WebhookContext, WebhookHandler};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CanonicalPayload {
    operation: String,
    node_id: Value,
    node_type: String,
    #[serde(default)]
    data: Option<Map<String, Value>>,
}

/// Deterministic internal id for a webhook-sourced node: a hash of
/// `nodeType + externalId` (spec.md §4.7), so re-delivery of the same
/// create always lands on the same node.
fn synthesize_id(node_type: &str, external_id: &str) -> String {
    let input = format!("{node_type}:{external_id}");
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Standard CRUD-over-HTTP handler installed for plugins that declare only
/// an `idField` (spec.md §4.7). `idField` is the payload field carrying the
/// plugin's external id, used both to look up existing nodes and to
/// coerce numeric/string ids consistently via `index_key`.
pub struct DefaultWebhookHandler {
    id_field: String,
}

impl DefaultWebhookHandler {
    pub fn new(id_field: impl Into<String>) -> Self {
        Self {
            id_field: id_field.into(),
        }
    }
}

#[async_trait]
impl WebhookHandler for DefaultWebhookHandler {
    async fn handle(&self, ctx: &WebhookContext) -> Result<Value, UdlError> {
        let payload: CanonicalPayload = serde_json::from_value(ctx.parsed_body.clone())
            .map_err(|e| UdlError::Validation(format!("invalid webhook payload: {e}")))?;

        let external_id = index_key(&payload.node_id)
            .ok_or_else(|| UdlError::Validation("nodeId must be a string or number".into()))?;

        let existing = ctx
            .store
            .get_by_field(&payload.node_type, &self.id_field, &payload.node_id);

        match payload.operation.as_str() {
            "create" => {
                if !existing.is_empty() {
                    return Err(UdlError::AlreadyRegistered(format!(
                        "{}:{}",
                        payload.node_type, external_id
                    )));
                }
                let id = synthesize_id(&payload.node_type, &external_id);
                let mut data = payload
                    .data
                    .ok_or_else(|| UdlError::Validation("data is required for create".into()))?;
                data.entry(self.id_field.clone()).or_insert(payload.node_id.clone());
                let node = ctx.actions.create(CreateNodeInput {
                    id,
                    node_type: payload.node_type,
                    parent: None,
                    payload: data,
                })?;
                Ok(json!({ "created": true, "id": node.id() }))
            }
            "update" => {
                let Some(current) = existing.into_iter().next() else {
                    return Err(UdlError::NotFound);
                };
                let data = payload
                    .data
                    .ok_or_else(|| UdlError::Validation("data is required for update".into()))?;
                let node = ctx.actions.create(CreateNodeInput {
                    id: current.id().to_string(),
                    node_type: payload.node_type,
                    parent: current.parent.clone(),
                    payload: data,
                })?;
                Ok(json!({ "updated": true, "id": node.id() }))
            }
            "upsert" => {
                let was_update = !existing.is_empty();
                let current = existing.into_iter().next();
                let id = current
                    .as_ref()
                    .map(|n| n.id().to_string())
                    .unwrap_or_else(|| synthesize_id(&payload.node_type, &external_id));
                let parent = current.as_ref().and_then(|n| n.parent.clone());
                let mut data = payload
                    .data
                    .ok_or_else(|| UdlError::Validation("data is required for upsert".into()))?;
                data.entry(self.id_field.clone()).or_insert(payload.node_id.clone());
                let node = ctx.actions.create(CreateNodeInput {
                    id,
                    node_type: payload.node_type,
                    parent,
                    payload: data,
                })?;
                Ok(json!({ "upserted": true, "wasUpdate": was_update, "id": node.id() }))
            }
            "delete" => {
                let Some(current) = existing.into_iter().next() else {
                    return Err(UdlError::NotFound);
                };
                ctx.actions.delete(current.id().to_string(), false)?;
                Ok(json!({ "deleted": true }))
            }
            other => Err(UdlError::Validation(format!("unknown webhook operation: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use udl_actions::NodeActions;
    use udl_core::NodeStore;

    fn ctx(store: &Arc<NodeStore>, body: Value) -> WebhookContext {
        WebhookContext {
            store: store.clone(),
            actions: NodeActions::new(store.clone(), "demo".to_string()),
            raw_body: serde_json::to_vec(&body).unwrap(),
            parsed_body: body,
        }
    }

    #[tokio::test]
    async fn upsert_then_upsert_reports_was_update() {
        let store = Arc::new(NodeStore::new());
        store.register_index("Product", "externalId");
        let handler = DefaultWebhookHandler::new("externalId");

        let first = handler
            .handle(&ctx(
                &store,
                json!({"operation":"upsert","nodeType":"Product","nodeId":"42","data":{"externalId":42,"title":"A"}}),
            ))
            .await
            .unwrap();
        assert_eq!(first["wasUpdate"], json!(false));

        let second = handler
            .handle(&ctx(
                &store,
                json!({"operation":"upsert","nodeType":"Product","nodeId":"42","data":{"externalId":42,"title":"B"}}),
            ))
            .await
            .unwrap();
        assert_eq!(second["wasUpdate"], json!(true));

        let found = store.get_by_field("Product", "externalId", &json!(42));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].field("title"), Some(&json!("B")));
    }

    #[tokio::test]
    async fn create_twice_is_conflict() {
        let store = Arc::new(NodeStore::new());
        store.register_index("Product", "externalId");
        let handler = DefaultWebhookHandler::new("externalId");

        handler
            .handle(&ctx(
                &store,
                json!({"operation":"create","nodeType":"Product","nodeId":"1","data":{"externalId":1}}),
            ))
            .await
            .unwrap();

        let err = handler
            .handle(&ctx(
                &store,
                json!({"operation":"create","nodeType":"Product","nodeId":"1","data":{"externalId":1}}),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, UdlError::AlreadyRegistered(_)));
    }

    #[tokio::test]
    async fn update_missing_node_is_not_found() {
        let store = Arc::new(NodeStore::new());
        let handler = DefaultWebhookHandler::new("externalId");
        let err = handler
            .handle(&ctx(
                &store,
                json!({"operation":"update","nodeType":"Product","nodeId":"1","data":{}}),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, UdlError::NotFound));
    }
}
