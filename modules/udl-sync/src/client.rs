use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use udl_common::UdlError;
use udl_core::{Node, NodeStore};
use udl_webhooks::{QueuedWebhook, WebhookQueue};

use crate::frame::{DeletedRef, SyncPullResponse, WireFrame};
use crate::state::SyncState;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const PULL_TIMEOUT: Duration = Duration::from_secs(10);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_BACKOFF_DOUBLINGS: u32 = 6;

/// Bootstrap fetch + reconnecting WebSocket subscription to a peer UDL
/// instance (spec.md §4's Remote Sync Client).
pub struct RemoteSyncClient {
    base_url: String,
    store: Arc<NodeStore>,
    http: reqwest::Client,
    reconnect_delay: Duration,
    max_reconnect_attempts: u32,
    state: RwLock<SyncState>,
    cancel: CancellationToken,
    /// When set, an incoming `webhook:queued` frame is relayed into this
    /// local queue for processing (spec.md §4.8's `onWebhookReceived`).
    webhook_relay: Option<WebhookQueue>,
}

impl RemoteSyncClient {
    pub fn new(
        base_url: impl Into<String>,
        store: Arc<NodeStore>,
        reconnect_delay: Duration,
        max_reconnect_attempts: u32,
        webhook_relay: Option<WebhookQueue>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            store,
            http: reqwest::Client::new(),
            reconnect_delay,
            max_reconnect_attempts,
            state: RwLock::new(SyncState::Idle),
            cancel: CancellationToken::new(),
            webhook_relay,
        }
    }

    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Cancel-aware shutdown: any in-progress wait, handshake, or read loop
    /// observes this promptly (spec.md §5).
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn set_state(&self, s: SyncState) {
        *self.state.write() = s;
    }

    /// Probes reachability, performs the initial bootstrap pull, then holds
    /// a reconnecting WebSocket subscription open until shutdown or the
    /// reconnect budget is exhausted.
    pub async fn run(&self) -> Result<(), UdlError> {
        self.set_state(SyncState::Connecting);
        self.probe().await?;
        self.bootstrap(DateTime::<Utc>::from_timestamp(0, 0).unwrap()).await?;

        let mut attempts: u32 = 0;
        loop {
            if self.cancel.is_cancelled() {
                self.set_state(SyncState::Closed);
                return Ok(());
            }

            self.set_state(SyncState::Connecting);
            match self.subscribe_once().await {
                Ok(()) if self.cancel.is_cancelled() => {
                    self.set_state(SyncState::Closed);
                    return Ok(());
                }
                Ok(()) => {
                    attempts = 0;
                }
                Err(e) => {
                    attempts += 1;
                    warn!(error = %e, attempts, "websocket subscription dropped");
                    if attempts >= self.max_reconnect_attempts {
                        self.set_state(SyncState::Closed);
                        return Err(UdlError::RemoteUnreachable(format!(
                            "exceeded {} reconnect attempts",
                            self.max_reconnect_attempts
                        )));
                    }
                }
            }

            self.set_state(SyncState::Backoff);
            let backoff = self.reconnect_delay * 2u32.pow(attempts.min(MAX_BACKOFF_DOUBLINGS));
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = self.cancel.cancelled() => {
                    self.set_state(SyncState::Closed);
                    return Ok(());
                }
            }
        }
    }

    async fn probe(&self) -> Result<(), UdlError> {
        let url = format!("{}/health", self.base_url.trim_end_matches('/'));
        let response = timeout(PROBE_TIMEOUT, self.http.get(&url).send())
            .await
            .map_err(|_| UdlError::RemoteUnreachable("health probe timed out".into()))?
            .map_err(|e| UdlError::RemoteUnreachable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(UdlError::RemoteUnreachable(format!(
                "health probe returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn bootstrap(&self, since: DateTime<Utc>) -> Result<(), UdlError> {
        let url = format!(
            "{}/_sync?since={}",
            self.base_url.trim_end_matches('/'),
            since.to_rfc3339()
        );
        let response = timeout(PULL_TIMEOUT, self.http.get(&url).send())
            .await
            .map_err(|_| UdlError::RemoteUnreachable("bootstrap pull timed out".into()))?
            .map_err(|e| UdlError::TransientIo(e.to_string()))?;

        let body: SyncPullResponse = response
            .json()
            .await
            .map_err(|e| UdlError::TransientIo(e.to_string()))?;

        info!(updated = body.updated.len(), deleted = body.deleted.len(), "bootstrap pull complete");
        for node in body.updated {
            self.store.put(node);
        }
        for id in body.deleted {
            self.store.delete(&id, false);
        }
        Ok(())
    }

    fn websocket_url(&self) -> String {
        let translated = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.base_url.clone()
        };
        format!("{}/ws", translated.trim_end_matches('/'))
    }

    async fn subscribe_once(&self) -> Result<(), UdlError> {
        let url = self.websocket_url();
        let (stream, _response) = timeout(HANDSHAKE_TIMEOUT, connect_async(&url))
            .await
            .map_err(|_| UdlError::RemoteUnreachable("websocket handshake timed out".into()))?
            .map_err(|e| UdlError::RemoteUnreachable(e.to_string()))?;

        self.set_state(SyncState::Open);
        let (mut write, mut read) = stream.split();

        loop {
            tokio::select! {
                message = read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => self.handle_frame(&text).await,
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = write.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Close(_))) | None => return Ok(()),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(UdlError::TransientIo(e.to_string())),
                    }
                }
                _ = self.cancel.cancelled() => return Ok(()),
            }
        }
    }

    async fn handle_frame(&self, text: &str) {
        let frame: WireFrame = match serde_json::from_str(text) {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "undecodable sync frame, skipping");
                return;
            }
        };

        match frame.kind.as_str() {
            "node:updated" => match serde_json::from_value::<Node>(frame.payload) {
                Ok(node) => self.store.put(node),
                Err(e) => warn!(error = %e, "undecodable node:updated frame"),
            },
            "node:deleted" => match serde_json::from_value::<DeletedRef>(frame.payload) {
                Ok(deleted) => {
                    self.store.delete(&deleted.id, false);
                }
                Err(e) => warn!(error = %e, "undecodable node:deleted frame"),
            },
            "webhook:queued" => {
                let Some(relay) = &self.webhook_relay else {
                    return;
                };
                match serde_json::from_value::<QueuedWebhook>(frame.payload) {
                    Ok(webhook) => {
                        if let Err(e) = relay.enqueue(webhook).await {
                            warn!(error = %e, "failed to relay upstream webhook into local queue");
                        }
                    }
                    Err(e) => warn!(error = %e, "undecodable webhook:queued frame"),
                }
            }
            other => {
                tracing::trace!(kind = other, "ignoring unrecognized sync frame kind");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use udl_webhooks::WebhookRegistry;

    fn client(url: &str) -> RemoteSyncClient {
        RemoteSyncClient::new(url, Arc::new(NodeStore::new()), Duration::from_millis(10), 3, None)
    }

    #[tokio::test]
    async fn relays_webhook_queued_frame_into_local_queue() {
        let store = Arc::new(NodeStore::new());
        let queue = WebhookQueue::new(
            Arc::new(WebhookRegistry::new()),
            store.clone(),
            Duration::from_millis(10),
            100,
            udl_webhooks::WebhookHooks::default(),
        );
        let mut events = queue.subscribe();

        let client = RemoteSyncClient::new(
            "http://peer.local",
            store,
            Duration::from_millis(10),
            3,
            Some(queue),
        );

        let webhook = QueuedWebhook {
            plugin_name: "demo".to_string(),
            raw_body: b"{}".to_vec(),
            parsed_body: serde_json::json!({}),
            headers: HashMap::new(),
            received_at: Utc::now(),
        };
        let frame = WireFrame {
            kind: "webhook:queued".to_string(),
            payload: serde_json::to_value(&webhook).unwrap(),
            timestamp: Utc::now(),
        };
        client.handle_frame(&serde_json::to_string(&frame).unwrap()).await;

        let event = events.recv().await.unwrap();
        assert!(matches!(event, udl_webhooks::WebhookEvent::Queued(_)));
    }

    #[test]
    fn translates_http_to_ws() {
        assert_eq!(client("http://peer.local:4000").websocket_url(), "ws://peer.local:4000/ws");
    }

    #[test]
    fn translates_https_to_wss() {
        assert_eq!(client("https://peer.local").websocket_url(), "wss://peer.local/ws");
    }

    #[test]
    fn strips_trailing_slash_before_appending_ws_path() {
        assert_eq!(client("http://peer.local/").websocket_url(), "ws://peer.local/ws");
    }

    #[test]
    fn starts_idle_and_updates_state() {
        let c = client("http://peer.local");
        assert_eq!(c.state(), SyncState::Idle);
        c.set_state(SyncState::Open);
        assert_eq!(c.state(), SyncState::Open);
    }

    #[test]
    fn shutdown_cancels_the_token() {
        let c = client("http://peer.local");
        assert!(!c.cancel.is_cancelled());
        c.shutdown();
        assert!(c.cancel.is_cancelled());
    }
}
