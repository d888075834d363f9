use std::sync::Arc;

use udl_cache::CacheStorage;
use udl_common::Config;
use udl_core::NodeStore;
use udl_query::ReferenceResolver;
use udl_webhooks::{WebhookQueue, WebhookRegistry};

use crate::graphql::ApiSchema;

/// Everything a route handler needs, mirroring the teacher's `AppState`
/// (`rootsignal-api/src/main.rs`): one struct, cheaply-cloned sub-components,
/// behind an `Arc` shared with every axum handler via `State`.
pub struct AppState {
    pub store: Arc<NodeStore>,
    pub cache: Arc<dyn CacheStorage>,
    pub webhook_registry: Arc<WebhookRegistry>,
    pub webhook_queue: WebhookQueue,
    pub reference_resolver: Arc<ReferenceResolver>,
    pub schema: ApiSchema,
    pub config: Config,
}
