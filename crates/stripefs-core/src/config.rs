//! Configuration system for stripefs.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $STRIPEFS_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/stripefs/config.toml
//!   3. ~/.config/stripefs/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StripeConfig {
    pub network: NetworkConfig,
    pub runtime: RuntimeConfig,
    pub storage: StorageConfig,
    pub cache: CacheConfig,
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address all listeners bind to.
    pub bind: String,
    /// Cache/metadata service port.
    pub cache_port: u16,
    /// Storage coordinator port.
    pub storage_port: u16,
    /// Storage node port.
    pub node_port: u16,
    /// HTTP status API port. 0 = disabled.
    pub api_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Worker threads per daemon.
    pub workers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub stripe_size: u32,
    /// Ordered node addresses (`host:port`). Order defines the ring.
    pub nodes: Vec<String>,
    /// Where a storage node keeps its stripe files.
    pub data_dir: PathBuf,
    /// Concurrent connections the coordinator opens to one node.
    pub max_connections_per_node: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub file_metadata_dir: PathBuf,
    pub dir_metadata_dir: PathBuf,
    /// TTL applied when a request does not carry one. 0 = no expiry.
    pub default_ttl: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub cache_addr: String,
    pub storage_addr: String,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            cache_port: 8888,
            storage_port: 7777,
            node_port: 7778,
            api_port: 9001,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { workers: 4 }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            stripe_size: 4096,
            nodes: vec!["127.0.0.1:7778".into()],
            data_dir: data_dir().join("stripes"),
            max_connections_per_node: 64,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            file_metadata_dir: data_dir().join("meta").join("files"),
            dir_metadata_dir: data_dir().join("meta").join("dirs"),
            default_ttl: 0,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            cache_addr: "127.0.0.1:8888".into(),
            storage_addr: "127.0.0.1:7777".into(),
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("stripefs")
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("stripefs")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl StripeConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            StripeConfig::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("STRIPEFS_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&StripeConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text)
                .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.stripe_size == 0 {
            return Err(ConfigError::Invalid("storage.stripe_size must be non-zero"));
        }
        if self.storage.nodes.is_empty() {
            return Err(ConfigError::Invalid("storage.nodes must not be empty"));
        }
        if self.runtime.workers == 0 {
            return Err(ConfigError::Invalid("runtime.workers must be non-zero"));
        }
        if self.storage.max_connections_per_node == 0 {
            return Err(ConfigError::Invalid(
                "storage.max_connections_per_node must be non-zero",
            ));
        }
        Ok(())
    }

    /// Apply STRIPEFS_* env var overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(v) = get("STRIPEFS_NETWORK__BIND") {
            self.network.bind = v;
        }
        if let Some(p) = get("STRIPEFS_NETWORK__CACHE_PORT").and_then(|v| v.parse().ok()) {
            self.network.cache_port = p;
        }
        if let Some(p) = get("STRIPEFS_NETWORK__STORAGE_PORT").and_then(|v| v.parse().ok()) {
            self.network.storage_port = p;
        }
        if let Some(p) = get("STRIPEFS_NETWORK__NODE_PORT").and_then(|v| v.parse().ok()) {
            self.network.node_port = p;
        }
        if let Some(p) = get("STRIPEFS_NETWORK__API_PORT").and_then(|v| v.parse().ok()) {
            self.network.api_port = p;
        }
        if let Some(n) = get("STRIPEFS_RUNTIME__WORKERS").and_then(|v| v.parse().ok()) {
            self.runtime.workers = n;
        }
        if let Some(n) = get("STRIPEFS_STORAGE__STRIPE_SIZE").and_then(|v| v.parse().ok()) {
            self.storage.stripe_size = n;
        }
        if let Some(v) = get("STRIPEFS_STORAGE__NODES") {
            self.storage.nodes = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = get("STRIPEFS_STORAGE__DATA_DIR") {
            self.storage.data_dir = PathBuf::from(v);
        }
        if let Some(v) = get("STRIPEFS_CACHE__FILE_METADATA_DIR") {
            self.cache.file_metadata_dir = PathBuf::from(v);
        }
        if let Some(v) = get("STRIPEFS_CACHE__DIR_METADATA_DIR") {
            self.cache.dir_metadata_dir = PathBuf::from(v);
        }
        if let Some(n) = get("STRIPEFS_CACHE__DEFAULT_TTL").and_then(|v| v.parse().ok()) {
            self.cache.default_ttl = n;
        }
        if let Some(v) = get("STRIPEFS_CLIENT__CACHE_ADDR") {
            self.client.cache_addr = v;
        }
        if let Some(v) = get("STRIPEFS_CLIENT__STORAGE_ADDR") {
            self.client.storage_addr = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid() {
        let config = StripeConfig::default();
        assert_eq!(config.storage.stripe_size, 4096);
        assert_eq!(config.network.cache_port, 8888);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn overrides_parse_node_list_and_numbers() {
        let env: HashMap<&str, &str> = [
            ("STRIPEFS_STORAGE__NODES", "10.0.0.1:7778, 10.0.0.2:7778,,"),
            ("STRIPEFS_STORAGE__STRIPE_SIZE", "65536"),
            ("STRIPEFS_RUNTIME__WORKERS", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = StripeConfig::default();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.storage.nodes, vec!["10.0.0.1:7778", "10.0.0.2:7778"]);
        assert_eq!(config.storage.stripe_size, 65536);
        // Unparseable values leave the default in place.
        assert_eq!(config.runtime.workers, 4);
    }

    #[test]
    fn validate_rejects_empty_ring() {
        let mut config = StripeConfig::default();
        config.storage.nodes.clear();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn partial_file_fills_defaults() {
        let tmp = std::env::temp_dir()
            .join(format!("stripefs-config-test-{}", std::process::id()));
        std::fs::create_dir_all(&tmp).unwrap();
        let path = tmp.join("config.toml");
        std::fs::write(&path, "[storage]\nstripe_size = 1024\nnodes = [\"a:1\", \"b:2\"]\n").unwrap();

        let config = StripeConfig::from_file(&path).unwrap();
        assert_eq!(config.storage.stripe_size, 1024);
        assert_eq!(config.storage.nodes.len(), 2);
        assert_eq!(config.network.storage_port, 7777);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn write_default_if_missing_creates_file() {
        let tmp = std::env::temp_dir()
            .join(format!("stripefs-config-default-{}", std::process::id()));
        let config_path = tmp.join("config.toml");

        unsafe {
            std::env::set_var("STRIPEFS_CONFIG", config_path.to_str().unwrap());
        }

        let path = StripeConfig::write_default_if_missing().expect("write_default_if_missing failed");
        assert!(path.exists());
        let config = StripeConfig::from_file(&path).expect("default file should parse");
        assert_eq!(config.storage.stripe_size, 4096);

        unsafe {
            std::env::remove_var("STRIPEFS_CONFIG");
        }
        let _ = std::fs::remove_dir_all(&tmp);
    }
}
