use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Deserialize, Clone)]
pub struct ParleyConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub account: AccountConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_seconds: u64,
}

fn default_max_connections() -> u32 {
    10
}

fn default_acquire_timeout() -> u64 {
    10
}

/// Which account this process drives. When `id` is unset the oldest account
/// row is used.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AccountConfig {
    pub id: Option<Uuid>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SessionConfig {
    /// Directories holding the transport's auth/cache state, wiped on logout.
    pub session_dirs: Vec<String>,
    /// Delay between destroying the connection and deleting its files.
    pub teardown_grace_ms: u64,
    /// Delay between file cleanup and reconnecting.
    pub reinit_delay_ms: u64,
    pub cleanup_attempts: u32,
    pub cleanup_backoff_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_dirs: vec![
                "~/.parley/session".to_string(),
                "~/.parley/cache".to_string(),
            ],
            teardown_grace_ms: 3000,
            reinit_delay_ms: 2000,
            cleanup_attempts: 5,
            cleanup_backoff_ms: 500,
        }
    }
}

impl SessionConfig {
    /// Session directories with `~` and `$VARS` expanded.
    pub fn expanded_dirs(&self) -> Vec<PathBuf> {
        self.session_dirs
            .iter()
            .map(|d| {
                shellexpand::full(d)
                    .map(|c| PathBuf::from(c.as_ref()))
                    .unwrap_or_else(|_| PathBuf::from(d))
            })
            .collect()
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TransportConfig {
    pub bridge_socket: String,
    pub connect_timeout_seconds: u64,
    /// Capacity of the inbound event channel per connection.
    pub event_buffer: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bridge_socket: "/tmp/parley-bridge.sock".to_string(),
            connect_timeout_seconds: 10,
            event_buffer: 256,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
    pub dimensions: u32,
    pub timeout_seconds: u64,
    /// Retries after the first attempt. Zero keeps the retriever single-shot.
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub api_key: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "gemini-embedding-001".to_string(),
            dimensions: 768,
            timeout_seconds: 15,
            max_retries: 0,
            retry_delay_ms: 500,
            api_key: None,
        }
    }
}

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful customer support assistant for this business. \
Answer using the knowledge snippets provided whenever they are relevant. \
Be concise, friendly and accurate. Never invent prices, policies or facts that are not supported by the snippets. \
Reply in the same language the customer used.";

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GenerationConfig {
    pub model: String,
    pub timeout_seconds: u64,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub system_prompt: String,
    pub api_key: Option<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.0-flash".to_string(),
            timeout_seconds: 30,
            temperature: 0.3,
            max_output_tokens: 512,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            api_key: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    /// Snippets rendered into the prompt.
    pub max_snippets: usize,
    pub use_server_side_search: bool,
    /// Hard cap on chunks scanned by the in-process fallback.
    pub fallback_scan_limit: i64,
    pub search_timeout_seconds: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            max_snippets: 5,
            use_server_side_search: true,
            fallback_scan_limit: 2000,
            search_timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DispatcherConfig {
    pub health_check_token: String,
    pub health_check_reply: String,
    pub apology_reply: String,
    pub preview_chars: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            health_check_token: "ping".to_string(),
            health_check_reply: "pong".to_string(),
            apology_reply: "Sorry, something went wrong while handling your message. Please try again in a moment."
                .to_string(),
            preview_chars: 120,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8780,
        }
    }
}

impl ParleyConfig {
    /// Load from a TOML file, then apply `PARLEY__SECTION__KEY` overrides.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("PARLEY").separator("__"))
            .build()?;
        s.try_deserialize()
    }

    /// Gemini key for a section, falling back to `GOOGLE_API_KEY`.
    pub fn api_key(section_key: &Option<String>) -> String {
        section_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var("GOOGLE_API_KEY").ok())
            .unwrap_or_default()
    }
}
