use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MnemoConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub reflection: ReflectionConfig,
    pub webhook: WebhookConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    /// Bearer token required on all non-health endpoints. Must be set
    /// (config or `MNEMO_AUTH_TOKEN`) before the server will start.
    pub auth_token: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for the object store and the embedding database.
    pub data_dir: String,
    /// Versions retained per path before the oldest is pruned.
    pub max_versions: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `"remote"` (HTTP embedding endpoint) or `"deterministic"` (hash-seeded,
    /// offline — useful for tests and air-gapped deployments).
    pub provider: String,
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub dimensions: usize,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub endpoint: String,
    pub api_key: String,
    /// High-quality model used for deep analysis.
    pub primary_model: String,
    /// Lightweight model used for the quick scan.
    pub fast_model: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ReflectionConfig {
    /// When false, the daily pass is skipped entirely.
    pub enabled: bool,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct WebhookConfig {
    pub url: String,
    pub auth_key: String,
    pub space_id: String,
}

impl Default for MnemoConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            reflection: ReflectionConfig::default(),
            webhook: WebhookConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8787,
            log_level: "info".into(),
            auth_token: String::new(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data_dir = default_mnemo_dir().to_string_lossy().into_owned();
        Self {
            data_dir,
            max_versions: 20,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "remote".into(),
            endpoint: "https://api.openai.com/v1/embeddings".into(),
            api_key: String::new(),
            model: "text-embedding-3-large".into(),
            dimensions: 1024,
            timeout_secs: 30,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.anthropic.com/v1/messages".into(),
            api_key: String::new(),
            primary_model: "claude-sonnet-4-5".into(),
            fast_model: "claude-haiku-4-5".into(),
            max_tokens: 4096,
            timeout_secs: 120,
        }
    }
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Returns `~/.mnemo/`
pub fn default_mnemo_dir() -> PathBuf {
    dirs::home_dir()
        .expect("home directory must exist")
        .join(".mnemo")
}

/// Returns the default config file path: `~/.mnemo/config.toml`
pub fn default_config_path() -> PathBuf {
    default_mnemo_dir().join("config.toml")
}

impl MnemoConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            MnemoConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("MNEMO_AUTH_TOKEN") {
            self.server.auth_token = val;
        }
        if let Ok(val) = std::env::var("MNEMO_DATA_DIR") {
            self.storage.data_dir = val;
        }
        if let Ok(val) = std::env::var("MNEMO_LOG_LEVEL") {
            self.server.log_level = val;
        }
        if let Ok(val) = std::env::var("MNEMO_EMBEDDING_API_KEY") {
            self.embedding.api_key = val;
        }
        if let Ok(val) = std::env::var("MNEMO_LLM_API_KEY") {
            self.llm.api_key = val;
        }
        if let Ok(val) = std::env::var("MNEMO_CHAT_WEBHOOK_URL") {
            self.webhook.url = val;
        }
        if let Ok(val) = std::env::var("MNEMO_CHAT_WEBHOOK_AUTH_KEY") {
            self.webhook.auth_key = val;
        }
        if let Ok(val) = std::env::var("MNEMO_CHAT_WEBHOOK_SPACE_ID") {
            self.webhook.space_id = val;
        }
        if let Ok(val) = std::env::var("MNEMO_USE_AGENTIC_REFLECTION") {
            self.reflection.enabled = val != "false" && val != "0";
        }
    }

    /// Resolve the data directory, expanding `~` if needed.
    pub fn resolved_data_dir(&self) -> PathBuf {
        expand_tilde(&self.storage.data_dir)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .expect("home directory must exist")
            .join(rest)
    } else {
        PathBuf::from(path)
    }
}
