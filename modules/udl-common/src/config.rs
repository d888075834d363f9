use std::env;
use std::path::PathBuf;

/// Per-plugin configuration entry (spec.md §6: `plugins: [{ name, options, strategy }]`).
#[derive(Debug, Clone)]
pub struct PluginConfig {
    pub name: String,
    pub options: serde_json::Value,
    /// `"sync"` or `"refetch"`.
    pub strategy: String,
}

/// WebSocket reconnection tuning for the Remote Sync Client (spec.md §4.8).
#[derive(Debug, Clone)]
pub struct WebsocketConfig {
    pub reconnect_delay_ms: u64,
    pub max_reconnect_attempts: u32,
}

impl Default for WebsocketConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 500,
            max_reconnect_attempts: 8,
        }
    }
}

/// Remote peer to bootstrap from and subscribe to (spec.md §4.8, §6).
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub url: String,
    pub websocket: WebsocketConfig,
    /// Relay inbound `webhook:queued` frames from this peer into the local
    /// webhook queue for local processing (spec.md §4.8, §6).
    pub on_webhook_received: bool,
}

/// Webhook intake tuning (spec.md §4.6).
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub debounce_ms: u64,
    pub max_queue_size: usize,
    /// Request body size guard (spec.md §5): default 1 MiB.
    pub max_body_bytes: usize,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 5_000,
            max_queue_size: 100,
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// Resolved configuration surface the core consumes (spec.md §6).
///
/// The config *file* loader itself is out of scope; this is the shape it
/// produces. `from_env` is a convenience loader in the teacher's style for
/// running the demo binary without a config file.
#[derive(Debug, Clone)]
pub struct Config {
    pub plugins: Vec<PluginConfig>,
    pub cache_enabled: bool,
    pub cache_dir: PathBuf,
    pub remote: Option<RemoteConfig>,
    pub webhooks: WebhookConfig,
    pub web_host: String,
    pub web_port: u16,
    /// `USE_MOCKS` — dev toggle for outbound plugin I/O (spec.md §6).
    pub use_mocks: bool,
}

impl Config {
    /// Load configuration from environment variables, matching the web
    /// server's deployment shape. Plugin list and hook closures are supplied
    /// by the caller (they are not representable as env vars).
    pub fn from_env() -> Self {
        let cache_enabled = env::var("UDL_CACHE")
            .map(|v| v != "false")
            .unwrap_or(true);

        let cache_dir = env::var("UDL_CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                env::current_dir()
                    .unwrap_or_else(|_| PathBuf::from("."))
                    .join(".udl-cache")
            });

        let remote = env::var("UDL_REMOTE_URL").ok().map(|url| RemoteConfig {
            url,
            websocket: WebsocketConfig {
                reconnect_delay_ms: env::var("UDL_REMOTE_RECONNECT_DELAY_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(500),
                max_reconnect_attempts: env::var("UDL_REMOTE_MAX_RECONNECT_ATTEMPTS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(8),
            },
            on_webhook_received: env::var("UDL_REMOTE_RELAY_WEBHOOKS")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        });

        let webhooks = WebhookConfig {
            debounce_ms: env::var("UDL_WEBHOOK_DEBOUNCE_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5_000),
            max_queue_size: env::var("UDL_WEBHOOK_MAX_QUEUE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(100),
            max_body_bytes: env::var("UDL_WEBHOOK_MAX_BODY_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1024 * 1024),
        };

        let use_mocks = resolve_mocks_mode();

        Self {
            plugins: Vec::new(),
            cache_enabled,
            cache_dir,
            remote,
            webhooks,
            web_host: env::var("UDL_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            web_port: env::var("UDL_PORT")
                .unwrap_or_else(|_| "4000".to_string())
                .parse()
                .expect("UDL_PORT must be a number"),
            use_mocks,
        }
    }

    /// Log non-sensitive config fields at startup, in the teacher's
    /// `log_redacted` style.
    pub fn log_summary(&self) {
        tracing::info!(
            plugins = self.plugins.len(),
            cache_enabled = self.cache_enabled,
            cache_dir = %self.cache_dir.display(),
            remote = self.remote.is_some(),
            use_mocks = self.use_mocks,
            "UDL configuration loaded"
        );
    }
}

/// Mode precedence per spec.md §6: credentials present -> real; explicit
/// toggle -> follow; development default -> mocks.
fn resolve_mocks_mode() -> bool {
    if env::var("UDL_SOURCE_CREDENTIALS").is_ok() {
        return false;
    }
    if let Ok(v) = env::var("USE_MOCKS") {
        return v != "false" && v != "0";
    }
    cfg!(debug_assertions)
}
