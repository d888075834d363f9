use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map};
use sha2::{Digest, Sha256};
use udl_actions::{CreateNodeInput, NodeActions};
use udl_common::UdlError;
use udl_pipeline::{Plugin, UpdateStrategy};

const MAX_ITEMS: usize = 20;

/// Sources `FeedItem` nodes from an RSS/Atom feed (grounded on the
/// teacher's `rootsignal-archive` feed service). Every run produces a full
/// snapshot of the feed's current entries, so it registers as `Refetch` —
/// the pipeline diffs and deletes entries that rolled off the feed.
pub struct FeedPlugin {
    name: String,
    feed_url: String,
    client: reqwest::Client,
}

impl FeedPlugin {
    pub fn new(name: impl Into<String>, feed_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .expect("failed to build feed HTTP client");
        Self {
            name: name.into(),
            feed_url: feed_url.into(),
            client,
        }
    }
}

#[async_trait]
impl Plugin for FeedPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn update_strategy(&self) -> UpdateStrategy {
        UpdateStrategy::Refetch
    }

    fn indexes(&self) -> Vec<(String, String)> {
        vec![("FeedItem".to_string(), "url".to_string())]
    }

    fn id_field(&self) -> Option<&str> {
        Some("url")
    }

    async fn source_nodes(&self, actions: &NodeActions) -> Result<(), UdlError> {
        let response = self
            .client
            .get(&self.feed_url)
            .header("User-Agent", "udl-plugin-demo/0.1")
            .send()
            .await
            .map_err(|e| UdlError::PluginSourceFailure(format!("feed fetch failed: {e}")))?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| UdlError::PluginSourceFailure(format!("feed body read failed: {e}")))?;

        let feed = feed_rs::parser::parse(&bytes[..])
            .map_err(|e| UdlError::PluginSourceFailure(format!("feed parse failed: {e}")))?;

        let mut entries = feed.entries;
        entries.sort_by(|a, b| {
            let a_date = a.published.or(a.updated);
            let b_date = b.published.or(b.updated);
            b_date.cmp(&a_date)
        });
        entries.truncate(MAX_ITEMS);

        for entry in entries {
            let Some(url) = entry.links.first().map(|l| l.href.clone()) else {
                continue;
            };
            let id = hex::encode(Sha256::digest(url.as_bytes()));
            let title = entry.title.map(|t| t.content);
            let pub_date = entry.published.or(entry.updated);

            let mut payload = Map::new();
            payload.insert("url".into(), json!(url));
            payload.insert("title".into(), json!(title));
            payload.insert("publishedAt".into(), json!(pub_date.map(|d| d.to_rfc3339())));

            actions.create(CreateNodeInput {
                id,
                node_type: "FeedItem".to_string(),
                parent: None,
                payload,
            })?;
        }

        Ok(())
    }
}
