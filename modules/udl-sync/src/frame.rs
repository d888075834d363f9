use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use udl_core::Node;

/// One `GET /_sync?since=` response (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncPullResponse {
    pub updated: Vec<Node>,
    pub deleted: Vec<String>,
}

/// The `{ type, payload, timestamp }` envelope carried over `GET /ws`
/// (spec.md §6). `kind` is matched loosely — frame kinds this client
/// doesn't recognize (e.g. `webhook:queued`) are ignored rather than
/// rejected, so the wire format can grow without breaking old clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireFrame {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletedRef {
    pub id: String,
}
