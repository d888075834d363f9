mod default_handler;
mod queue;
mod registry;

pub use default_handler::DefaultWebhookHandler;
pub use queue::{QueuedWebhook, WebhookBatch, WebhookEvent, WebhookHooks, WebhookQueue};
pub use registry::{validate_plugin_name, HandlerRegistration, WebhookContext, WebhookHandler, WebhookRegistry};
