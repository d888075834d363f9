use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use tracing::{error, warn};
use udl_common::UdlError;
use udl_core::NodeStore;

use crate::registry::WebhookContext;
use crate::WebhookRegistry;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedWebhook {
    pub plugin_name: String,
    pub raw_body: Vec<u8>,
    pub parsed_body: serde_json::Value,
    pub headers: HashMap<String, String>,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookBatch {
    pub webhooks: Vec<QueuedWebhook>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum WebhookEvent {
    Queued(QueuedWebhook),
    BatchComplete { size: usize, started_at: DateTime<Utc>, completed_at: DateTime<Utc> },
}

/// `onWebhookReceived`, `onBeforeWebhookTriggered`, `onAfterWebhookTriggered`
/// (spec.md §4.6, Design Notes §9: "function-valued fields on config
/// structs; the core calls them synchronously").
#[derive(Default, Clone)]
pub struct WebhookHooks {
    pub on_webhook_received: Option<Arc<dyn Fn(QueuedWebhook) -> Option<QueuedWebhook> + Send + Sync>>,
    pub on_before_webhook_triggered: Option<Arc<dyn Fn(&WebhookBatch) + Send + Sync>>,
    pub on_after_webhook_triggered: Option<Arc<dyn Fn(&WebhookBatch) + Send + Sync>>,
}

struct QueueState {
    pending: Vec<QueuedWebhook>,
    generation: u64,
}

struct Shared {
    registry: Arc<WebhookRegistry>,
    store: Arc<NodeStore>,
    debounce: Duration,
    max_size: usize,
    hooks: WebhookHooks,
    events: broadcast::Sender<WebhookEvent>,
    state: Mutex<QueueState>,
    processing: Mutex<()>,
    shutdown: AtomicBool,
    processed_total: AtomicU64,
}

/// FIFO queue of webhooks coalesced into batches on a debounce timer
/// (spec.md §4.6). Cheap to clone — internally `Arc`-backed, the way
/// `NodeStore`/`EventBus` consumers are expected to share a handle.
#[derive(Clone)]
pub struct WebhookQueue {
    shared: Arc<Shared>,
}

impl WebhookQueue {
    pub fn new(
        registry: Arc<WebhookRegistry>,
        store: Arc<NodeStore>,
        debounce: Duration,
        max_size: usize,
        hooks: WebhookHooks,
    ) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            shared: Arc::new(Shared {
                registry,
                store,
                debounce,
                max_size,
                hooks,
                events,
                state: Mutex::new(QueueState {
                    pending: Vec::new(),
                    generation: 0,
                }),
                processing: Mutex::new(()),
                shutdown: AtomicBool::new(false),
                processed_total: AtomicU64::new(0),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WebhookEvent> {
        self.shared.events.subscribe()
    }

    pub fn processed_total(&self) -> u64 {
        self.shared.processed_total.load(Ordering::SeqCst)
    }

    /// Appends a webhook and either triggers immediate processing (queue at
    /// capacity) or (re)arms the debounce timer (spec.md §4.6).
    pub async fn enqueue(&self, mut webhook: QueuedWebhook) -> Result<(), UdlError> {
        if self.shared.shutdown.load(Ordering::SeqCst) {
            return Err(UdlError::Validation("webhook queue is shut down".into()));
        }

        if let Some(hook) = &self.shared.hooks.on_webhook_received {
            match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| hook(webhook.clone()))) {
                Ok(Some(transformed)) => webhook = transformed,
                Ok(None) => return Ok(()), // dropped by the hook
                Err(_) => error!("onWebhookReceived panicked, keeping the original webhook"),
            }
        }

        let (should_flush_now, generation) = {
            let mut state = self.shared.state.lock().await;
            state.pending.push(webhook.clone());
            state.generation += 1;
            (state.pending.len() >= self.shared.max_size, state.generation)
        };

        let _ = self.shared.events.send(WebhookEvent::Queued(webhook));

        if should_flush_now {
            trigger_flush(&self.shared, generation).await;
        } else {
            let shared = self.shared.clone();
            let debounce = self.shared.debounce;
            tokio::spawn(async move {
                tokio::time::sleep(debounce).await;
                trigger_flush(&shared, generation).await;
            });
        }

        Ok(())
    }

    /// Forces immediate processing of whatever is pending, waiting out any
    /// in-flight batch first. Used on graceful shutdown (spec.md §5).
    pub async fn flush(&self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        let _guard = self.shared.processing.lock().await;
        let webhooks = {
            let mut state = self.shared.state.lock().await;
            state.generation += 1;
            std::mem::take(&mut state.pending)
        };
        if !webhooks.is_empty() {
            process_batch(&self.shared, webhooks).await;
        }
    }
}

/// A timer fires for the generation it was armed at. If a later enqueue has
/// since bumped the generation, this tick is stale and the newer timer (or
/// the max-size trip) owns the flush — the debounce coalesces correctly.
async fn trigger_flush(shared: &Shared, expected_generation: u64) {
    let guard = match shared.processing.try_lock() {
        Ok(g) => g,
        Err(_) => return, // a batch is already in flight; the next tick picks this up
    };

    let webhooks = {
        let mut state = shared.state.lock().await;
        if state.generation != expected_generation || state.pending.is_empty() {
            return;
        }
        state.generation += 1;
        std::mem::take(&mut state.pending)
    };

    process_batch(shared, webhooks).await;
    drop(guard);
}

async fn process_batch(shared: &Shared, webhooks: Vec<QueuedWebhook>) {
    let started_at = Utc::now();

    for webhook in &webhooks {
        process_one(shared, webhook).await;
    }

    let completed_at = Utc::now();
    let batch = WebhookBatch {
        webhooks: webhooks.clone(),
        started_at,
        completed_at,
    };

    if let Some(hook) = &shared.hooks.on_before_webhook_triggered {
        hook(&batch);
    }
    if let Some(hook) = &shared.hooks.on_after_webhook_triggered {
        hook(&batch);
    }

    shared.processed_total.fetch_add(webhooks.len() as u64, Ordering::SeqCst);
    let _ = shared.events.send(WebhookEvent::BatchComplete {
        size: batch.webhooks.len(),
        started_at,
        completed_at,
    });
}

/// One webhook's handler invocation. Errors are caught and logged — they
/// never poison the rest of the batch (spec.md §4.6).
async fn process_one(shared: &Shared, webhook: &QueuedWebhook) {
    let Some(registration) = shared.registry.get(&webhook.plugin_name) else {
        warn!(plugin = %webhook.plugin_name, "no handler registered, dropping queued webhook");
        return;
    };

    let actions = udl_actions::NodeActions::new(shared.store.clone(), webhook.plugin_name.clone());
    let ctx = WebhookContext {
        store: shared.store.clone(),
        actions,
        raw_body: webhook.raw_body.clone(),
        parsed_body: webhook.parsed_body.clone(),
    };

    if let Err(e) = registration.handler.handle(&ctx).await {
        warn!(plugin = %webhook.plugin_name, error = %e, "webhook handler failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{HandlerRegistration, WebhookHandler};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct CountingHandler(Arc<AtomicUsize>);

    #[async_trait]
    impl WebhookHandler for CountingHandler {
        async fn handle(&self, _ctx: &WebhookContext) -> Result<serde_json::Value, UdlError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::Value::Null)
        }
    }

    fn webhook(plugin: &str) -> QueuedWebhook {
        QueuedWebhook {
            plugin_name: plugin.to_string(),
            raw_body: b"{}".to_vec(),
            parsed_body: serde_json::json!({}),
            headers: HashMap::new(),
            received_at: Utc::now(),
        }
    }

    fn setup(max_size: usize, debounce_ms: u64) -> (WebhookQueue, Arc<AtomicUsize>) {
        let registry = Arc::new(WebhookRegistry::new());
        let counter = Arc::new(AtomicUsize::new(0));
        registry
            .register(
                "demo",
                HandlerRegistration {
                    handler: Arc::new(CountingHandler(counter.clone())),
                    description: None,
                    verify_signature: None,
                },
            )
            .unwrap();
        let store = Arc::new(NodeStore::new());
        let queue = WebhookQueue::new(
            registry,
            store,
            Duration::from_millis(debounce_ms),
            max_size,
            WebhookHooks::default(),
        );
        (queue, counter)
    }

    #[tokio::test]
    async fn debounced_enqueues_coalesce_into_one_batch() {
        let (queue, counter) = setup(100, 50);
        let mut events = queue.subscribe();

        for _ in 0..5 {
            queue.enqueue(webhook("demo")).await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 5);
        let mut batch_sizes = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let WebhookEvent::BatchComplete { size, .. } = event {
                batch_sizes.push(size);
            }
        }
        assert_eq!(batch_sizes, vec![5]);
    }

    #[tokio::test]
    async fn max_size_trips_immediate_processing() {
        let (queue, counter) = setup(3, 5_000);
        for _ in 0..3 {
            queue.enqueue(webhook("demo")).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn flush_processes_pending_synchronously() {
        let (queue, counter) = setup(100, 5_000);
        queue.enqueue(webhook("demo")).await.unwrap();
        queue.flush().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejects_enqueue_after_shutdown() {
        let (queue, _counter) = setup(100, 50);
        queue.flush().await;
        let err = queue.enqueue(webhook("demo")).await.unwrap_err();
        assert!(matches!(err, UdlError::Validation(_)));
    }
}
