use async_trait::async_trait;
use udl_actions::NodeActions;
use udl_common::UdlError;

/// Whether a plugin's source step is expected to report the delta itself
/// (`Sync`) or always produce a full snapshot that the pipeline diffs
/// against what it owned last run (`Refetch`) — spec.md §4.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStrategy {
    Sync,
    Refetch,
}

/// A data source the pipeline runs at startup (spec.md §4.5). Implementors
/// supply nodes through the owner-bound `NodeActions` they're handed —
/// they never touch a `NodeStore` directly.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Canonical name; also the node owner and the cache partition key.
    fn name(&self) -> &str;

    fn update_strategy(&self) -> UpdateStrategy {
        UpdateStrategy::Refetch
    }

    /// `(nodeType, field)` pairs this plugin wants indexed.
    fn indexes(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// The payload field holding this plugin's external id, consulted by
    /// the default webhook handler (spec.md §4.7).
    fn id_field(&self) -> Option<&str> {
        None
    }

    async fn source_nodes(&self, actions: &NodeActions) -> Result<(), UdlError>;
}
