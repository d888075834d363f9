use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;
use udl_common::UdlError;
use udl_core::NodeEvent;
use udl_sync::{DeletedRef, SyncPullResponse, WireFrame};
use udl_webhooks::{validate_plugin_name, QueuedWebhook, WebhookEvent};

use crate::state::AppState;

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

#[derive(Debug, Deserialize)]
pub struct SyncQuery {
    since: Option<String>,
}

/// `GET /_sync?since=<iso8601>` (spec.md §6). A missing or epoch `since`
/// yields a full dump.
pub async fn sync_pull(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SyncQuery>,
) -> Result<Json<SyncPullResponse>, UdlError> {
    let since = match params.since {
        Some(raw) => DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| UdlError::Validation(format!("invalid `since`: {e}")))?,
        None => DateTime::<Utc>::from_timestamp(0, 0).unwrap(),
    };

    let updated = state
        .store
        .all_nodes()
        .into_iter()
        .filter(|n| {
            DateTime::<Utc>::from_timestamp_millis(n.internal.modified_at)
                .map(|modified| modified > since)
                .unwrap_or(false)
        })
        .collect();
    let deleted = state
        .store
        .deletion_log_since(since, None)
        .into_iter()
        .map(|entry| entry.node_id)
        .collect();

    Ok(Json(SyncPullResponse { updated, deleted }))
}

/// `POST /_webhooks/<plugin-name>/sync` (spec.md §4.6, §6). Axum's `Path`
/// extractor percent-decodes the segment before handing it to us, so
/// scope-prefixed names (`@org/name`) survive the round trip.
pub async fn webhook_intake(
    State(state): State<Arc<AppState>>,
    Path(plugin_name): Path<String>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<impl IntoResponse, UdlError> {
    validate_plugin_name(&plugin_name)?;

    let registration = state.webhook_registry.get(&plugin_name).ok_or(UdlError::NotFound)?;

    if let Some(verify) = &registration.verify_signature {
        let signature = headers.get("x-webhook-signature").and_then(|v| v.to_str().ok());
        if !verify(&body, signature) {
            return Err(UdlError::SignatureInvalid);
        }
    }

    let parsed_body: Value = serde_json::from_slice(&body)
        .map_err(|e| UdlError::Validation(format!("webhook body is not valid JSON: {e}")))?;

    let header_map: HashMap<String, String> = headers
        .iter()
        .map(|(k, v)| (k.as_str().to_string(), v.to_str().unwrap_or_default().to_string()))
        .collect();

    state
        .webhook_queue
        .enqueue(QueuedWebhook {
            plugin_name,
            raw_body: body.to_vec(),
            parsed_body,
            headers: header_map,
            received_at: Utc::now(),
        })
        .await?;

    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "queued" }))))
}

/// `GET /ws` (spec.md §6): relays node lifecycle and webhook-queued events
/// as `{ type, payload, timestamp }` frames until the client disconnects.
pub async fn ws_handler(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| relay(socket, state))
}

async fn relay(mut socket: WebSocket, state: Arc<AppState>) {
    let mut node_events = state.store.subscribe();
    let mut webhook_events = state.webhook_queue.subscribe();

    loop {
        let frame = tokio::select! {
            event = node_events.recv() => match event {
                Ok(NodeEvent::Created(node)) | Ok(NodeEvent::Updated(node)) => WireFrame {
                    kind: "node:updated".to_string(),
                    payload: serde_json::to_value(&node).unwrap_or(Value::Null),
                    timestamp: Utc::now(),
                },
                Ok(NodeEvent::Deleted { id, .. }) => WireFrame {
                    kind: "node:deleted".to_string(),
                    payload: serde_json::to_value(DeletedRef { id }).unwrap_or(Value::Null),
                    timestamp: Utc::now(),
                },
                Err(_) => continue, // lagged or closed: best-effort fan-out, skip
            },
            event = webhook_events.recv() => match event {
                Ok(WebhookEvent::Queued(webhook)) => WireFrame {
                    kind: "webhook:queued".to_string(),
                    payload: serde_json::to_value(&webhook).unwrap_or(Value::Null),
                    timestamp: Utc::now(),
                },
                Ok(WebhookEvent::BatchComplete { .. }) | Err(_) => continue,
            },
        };

        let text = match serde_json::to_string(&frame) {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "failed to encode sync frame");
                continue;
            }
        };
        if socket.send(WsMessage::Text(text.into())).await.is_err() {
            return;
        }
    }
}
