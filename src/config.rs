use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::IndexError;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct MemdexConfig {
    pub logging: LoggingConfig,
    pub storage: StorageConfig,
    pub workspace: WorkspaceConfig,
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub index: IndexConfig,
    pub sync: SyncConfig,
    pub search: SearchConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Directory holding `MEMORY.md` and the `memory/` subtree.
    pub root: String,
    /// Additional files or directories indexed as memory sources.
    pub extra_paths: Vec<String>,
}

/// Chunk sizing, in approximate tokens (4 chars per token).
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkingConfig {
    pub tokens: usize,
    pub overlap: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: String,
    /// Vector width the index is built for. Must match the provider.
    pub dimensions: usize,
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub batch_size: usize,
    /// Send `dimensions` with each request so the endpoint returns vectors of
    /// the configured width.
    pub send_dimensions: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IndexConfig {
    pub vector_enabled: bool,
    pub fts_enabled: bool,
    pub cache_enabled: bool,
    pub cache_max_entries: Option<usize>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SyncConfig {
    pub watch: bool,
    pub debounce_ms: u64,
    pub on_start: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SearchConfig {
    pub max_results: usize,
    pub min_score: f64,
    pub snippet_max_chars: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_memdex_dir()
            .join("index.db")
            .to_string_lossy()
            .into_owned();
        Self { db_path }
    }
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: ".".into(),
            extra_paths: Vec::new(),
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            tokens: 400,
            overlap: 80,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            model: "text-embedding-3-small".into(),
            dimensions: 1536,
            base_url: "https://api.openai.com".into(),
            api_key_env: "OPENAI_API_KEY".into(),
            batch_size: 32,
            send_dimensions: true,
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            vector_enabled: true,
            fts_enabled: true,
            cache_enabled: true,
            cache_max_entries: None,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            watch: true,
            debounce_ms: 5000,
            on_start: true,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_results: 6,
            min_score: 0.0,
            snippet_max_chars: 700,
        }
    }
}

/// Returns `~/.memdex/`
pub fn default_memdex_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".memdex")
}

/// Returns the default config file path: `~/.memdex/config.toml`
pub fn default_config_path() -> PathBuf {
    default_memdex_dir().join("config.toml")
}

impl MemdexConfig {
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
            MemdexConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides (MEMDEX_DB, MEMDEX_WORKSPACE, MEMDEX_LOG_LEVEL).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("MEMDEX_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("MEMDEX_WORKSPACE") {
            self.workspace.root = val;
        }
        if let Ok(val) = std::env::var("MEMDEX_LOG_LEVEL") {
            self.logging.level = val;
        }
    }

    /// Reject settings that would make the index unusable.
    pub fn validate(&self) -> Result<(), IndexError> {
        if self.chunking.tokens == 0 {
            return Err(IndexError::InvalidConfig(
                "chunking.tokens must be greater than zero".into(),
            ));
        }
        if self.chunking.overlap >= self.chunking.tokens {
            return Err(IndexError::InvalidConfig(format!(
                "chunking.overlap ({}) must be smaller than chunking.tokens ({})",
                self.chunking.overlap, self.chunking.tokens
            )));
        }
        if self.embedding.dimensions == 0 {
            return Err(IndexError::InvalidConfig(
                "embedding.dimensions must be greater than zero".into(),
            ));
        }
        if self.embedding.batch_size == 0 {
            return Err(IndexError::InvalidConfig(
                "embedding.batch_size must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }

    /// Resolve the workspace root, expanding `~` if needed.
    pub fn resolved_workspace(&self) -> PathBuf {
        expand_tilde(&self.workspace.root)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
