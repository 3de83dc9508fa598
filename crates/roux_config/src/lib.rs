//! Configuration management for Roux
//!
//! This crate handles loading and validating `roux.yaml` at the vault root.
//! A missing file yields the defaults; an unreadable or malformed file is a
//! configuration error.

use roux_common::{Result, RouxError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Vault root path (set programmatically, not in YAML)
    #[serde(skip)]
    pub root: PathBuf,

    /// Provider selection
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Watcher settings
    #[serde(default)]
    pub watcher: WatcherConfig,

    /// MCP settings
    #[serde(default)]
    pub mcp: McpConfig,
}

/// Provider configuration ([providers])
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub store: StoreProviderConfig,

    /// Optional embedding provider; absence downgrades semantic capability.
    #[serde(default)]
    pub embedding: Option<EmbeddingProviderConfig>,
}

/// Store provider ([providers.store])
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreProviderConfig {
    #[serde(default = "default_store_type", rename = "type")]
    pub kind: String,

    /// Side-car directory, relative to the vault root.
    #[serde(default = "default_sidecar_dir")]
    pub sidecar_dir: String,
}

fn default_store_type() -> String {
    "docstore".to_string()
}
fn default_sidecar_dir() -> String {
    ".roux".to_string()
}

impl Default for StoreProviderConfig {
    fn default() -> Self {
        Self {
            kind: default_store_type(),
            sidecar_dir: default_sidecar_dir(),
        }
    }
}

/// Embedding provider ([providers.embedding])
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingProviderConfig {
    #[serde(default = "default_embedding_type", rename = "type")]
    pub kind: String,

    /// Seconds to wait for the embedder before giving up.
    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_embedding_type() -> String {
    "local".to_string()
}
fn default_embed_timeout_secs() -> u64 {
    30
}

impl Default for EmbeddingProviderConfig {
    fn default() -> Self {
        Self {
            kind: default_embedding_type(),
            timeout_secs: default_embed_timeout_secs(),
        }
    }
}

/// Watcher configuration ([watcher])
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Quiescence window for batching filesystem events.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Enabled source extensions, without the dot.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

fn default_true() -> bool {
    true
}
fn default_debounce_ms() -> u64 {
    100
}
fn default_extensions() -> Vec<String> {
    vec!["md".to_string()]
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: default_debounce_ms(),
            extensions: default_extensions(),
        }
    }
}

/// MCP configuration ([mcp])
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpConfig {
    /// Upper bound on `limit` for the search-shaped tools. Tools with wider
    /// pages (tag search, listing) scale their caps from this value.
    #[serde(default = "default_max_search_limit")]
    pub max_search_limit: usize,
}

fn default_max_search_limit() -> usize {
    50
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            max_search_limit: default_max_search_limit(),
        }
    }
}

impl Config {
    /// Load configuration from the vault root.
    pub fn load(vault_root: &Path) -> Result<Self> {
        Self::load_from(vault_root, &vault_root.join("roux.yaml"))
    }

    /// Load configuration from an explicit file path.
    pub fn load_from(vault_root: &Path, config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Ok(Self {
                root: vault_root.to_path_buf(),
                ..Self::default()
            });
        }

        let content = std::fs::read_to_string(config_path)
            .map_err(|e| RouxError::Config(format!("failed to read config: {}", e)))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .map_err(|e| RouxError::Config(format!("failed to parse config: {}", e)))?;

        if config.providers.store.kind != "docstore" {
            return Err(RouxError::Config(format!(
                "unsupported store provider: {}",
                config.providers.store.kind
            )));
        }
        if let Some(embedding) = &config.providers.embedding {
            if embedding.kind != "local" {
                return Err(RouxError::Config(format!(
                    "unsupported embedding provider: {}",
                    embedding.kind
                )));
            }
        }

        config.root = vault_root.to_path_buf();
        Ok(config)
    }

    /// Absolute path of the side-car directory.
    pub fn sidecar_path(&self) -> PathBuf {
        self.root.join(&self.providers.store.sidecar_dir)
    }
}
