use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use udl_cache::{CacheStorage, FilesystemCacheStorage};
use udl_common::Config;
use udl_core::NodeStore;
use udl_pipeline::{Plugin, SourcePipeline};
use udl_plugin_demo::{FeedPlugin, RestPlugin};

/// One-shot runner proving the Source Pipeline end to end against the two
/// example plugins. A long-running deployment would schedule `run` on its
/// own cadence (spec.md says polling cadence is plugin-owned, not core).
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("udl=info".parse()?))
        .init();

    let config = Config::from_env();
    config.log_summary();

    let store = Arc::new(NodeStore::new());
    let cache: Arc<dyn CacheStorage> = Arc::new(FilesystemCacheStorage::new(config.cache_dir.clone()));
    let pipeline = SourcePipeline::new(store.clone(), cache, config.cache_enabled);

    let feed_url = std::env::var("UDL_DEMO_FEED_URL")
        .unwrap_or_else(|_| "https://example.com/feed.xml".to_string());
    let rest_endpoint = std::env::var("UDL_DEMO_REST_ENDPOINT")
        .unwrap_or_else(|_| "https://example.com/api/products".to_string());

    let plugins: Vec<Arc<dyn Plugin>> = vec![
        Arc::new(FeedPlugin::new("demo-feed", feed_url)),
        Arc::new(RestPlugin::new(
            "demo-rest",
            "Product",
            rest_endpoint,
            "externalId",
            None,
        )),
    ];

    pipeline.run(&plugins).await;

    let feed_items = store.get_by_type("FeedItem").len();
    let products = store.get_by_type("Product").len();
    tracing::info!(feed_items, products, "demo pipeline run complete");

    Ok(())
}
