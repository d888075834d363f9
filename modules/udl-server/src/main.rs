use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_graphql_axum::{GraphQLRequest, GraphQLResponse};
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, HeaderValue, Method};
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::Router;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use udl_cache::{CacheStorage, FilesystemCacheStorage};
use udl_common::Config;
use udl_core::NodeStore;
use udl_query::ReferenceResolver;
use udl_sync::RemoteSyncClient;
use udl_webhooks::{WebhookHooks, WebhookQueue, WebhookRegistry};

mod graphql;
mod routes;
mod state;

use graphql::{build_schema, ApiSchema};
use state::AppState;

async fn graphql_handler(State(state): State<Arc<AppState>>, req: GraphQLRequest) -> GraphQLResponse {
    state.schema.execute(req.into_inner()).await.into()
}

async fn graphiql() -> impl IntoResponse {
    if cfg!(debug_assertions) {
        Html(async_graphql::http::GraphiQLSource::build().endpoint("/graphql").finish()).into_response()
    } else {
        axum::http::StatusCode::NOT_FOUND.into_response()
    }
}

fn cors_layer() -> tower_http::cors::CorsLayer {
    if cfg!(debug_assertions) {
        tower_http::cors::CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE])
    } else {
        let origins: Vec<HeaderValue> = std::env::var("UDL_CORS_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect();
        tower_http::cors::CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE])
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("udl=info".parse()?))
        .init();

    let config = Config::from_env();
    config.log_summary();

    let store = Arc::new(NodeStore::new());
    let cache: Arc<dyn CacheStorage> = Arc::new(FilesystemCacheStorage::new(config.cache_dir.clone()));
    let webhook_registry = Arc::new(WebhookRegistry::new());
    let webhook_queue = WebhookQueue::new(
        webhook_registry.clone(),
        store.clone(),
        Duration::from_millis(config.webhooks.debounce_ms),
        config.webhooks.max_queue_size,
        WebhookHooks::default(),
    );

    // Remote sync, if configured, runs for the life of the process and
    // reconnects on its own (spec.md §4.8) — failures here don't stop the
    // HTTP surface from serving.
    if let Some(remote) = &config.remote {
        let webhook_relay = remote.on_webhook_received.then(|| webhook_queue.clone());
        let sync_client = Arc::new(RemoteSyncClient::new(
            remote.url.clone(),
            store.clone(),
            Duration::from_millis(remote.websocket.reconnect_delay_ms),
            remote.websocket.max_reconnect_attempts,
            webhook_relay,
        ));
        tokio::spawn(async move {
            if let Err(e) = sync_client.run().await {
                tracing::error!(error = %e, "remote sync client exited");
            }
        });
    }

    let reference_resolver = Arc::new(ReferenceResolver::new(store.clone()));
    let schema: ApiSchema = build_schema(store.clone(), reference_resolver.clone());
    let max_body_bytes = config.webhooks.max_body_bytes;
    let state = Arc::new(AppState {
        store,
        cache,
        webhook_registry,
        webhook_queue,
        reference_resolver,
        schema,
        config: config.clone(),
    });

    let app = Router::new()
        .route("/graphql", get(graphiql).post(graphql_handler))
        .route("/health", get(routes::health))
        .route("/_sync", get(routes::sync_pull))
        .route("/ws", get(routes::ws_handler))
        .route(
            "/_webhooks/{plugin_name}/sync",
            post(routes::webhook_intake).layer(DefaultBodyLimit::max(max_body_bytes)),
        )
        .with_state(state)
        .layer(cors_layer())
        .layer(SetResponseHeaderLayer::overriding(
            header::HeaderName::from_static("x-frame-options"),
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    path = %request.uri().path(),
                )
            }),
        );

    let addr = format!("{}:{}", config.web_host, config.web_port);
    tracing::info!(addr = %addr, "UDL server starting");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
