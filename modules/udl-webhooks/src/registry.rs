use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use regex::Regex;
use serde_json::Value;
use udl_actions::NodeActions;
use udl_common::UdlError;
use udl_core::NodeStore;

/// Everything a handler needs to process one webhook (spec.md §4.6): a
/// read path via `store`, a write path scoped to the registered plugin's
/// ownership via `actions`, and both body forms.
pub struct WebhookContext {
    pub store: Arc<NodeStore>,
    pub actions: NodeActions,
    pub raw_body: Vec<u8>,
    pub parsed_body: Value,
}

#[async_trait]
pub trait WebhookHandler: Send + Sync {
    async fn handle(&self, ctx: &WebhookContext) -> Result<Value, UdlError>;
}

#[derive(Clone)]
pub struct HandlerRegistration {
    pub handler: Arc<dyn WebhookHandler>,
    pub description: Option<String>,
    /// `(rawBody, signatureHeader) -> valid`. Absent means no signature
    /// verification is performed for this plugin.
    pub verify_signature: Option<Arc<dyn Fn(&[u8], Option<&str>) -> bool + Send + Sync>>,
}

fn plugin_name_pattern() -> &'static Regex {
    static PATTERN: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(@[A-Za-z0-9][A-Za-z0-9_-]*/)?[A-Za-z0-9][A-Za-z0-9_-]*$").unwrap()
    })
}

pub fn validate_plugin_name(name: &str) -> Result<(), UdlError> {
    if plugin_name_pattern().is_match(name) {
        Ok(())
    } else {
        Err(UdlError::Validation(format!("invalid plugin name: {name}")))
    }
}

/// `pluginName -> handler registration` (spec.md §4.6).
#[derive(Default)]
pub struct WebhookRegistry {
    handlers: RwLock<HashMap<String, HandlerRegistration>>,
}

impl WebhookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, plugin_name: &str, registration: HandlerRegistration) -> Result<(), UdlError> {
        validate_plugin_name(plugin_name)?;
        let mut handlers = self.handlers.write();
        if handlers.contains_key(plugin_name) {
            return Err(UdlError::AlreadyRegistered(plugin_name.to_string()));
        }
        handlers.insert(plugin_name.to_string(), registration);
        Ok(())
    }

    pub fn get(&self, plugin_name: &str) -> Option<HandlerRegistration> {
        self.handlers.read().get(plugin_name).cloned()
    }

    pub fn contains(&self, plugin_name: &str) -> bool {
        self.handlers.read().contains_key(plugin_name)
    }
}
