pub mod config;
pub mod error;

pub use config::{Config, PluginConfig, RemoteConfig, WebhookConfig, WebsocketConfig};
pub use error::UdlError;
