//! Configuration file parser for ~/.config/tubefeed/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde but logged as warnings, since they are
//! usually typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::gateway::DEFAULT_MAX_CONNECTIONS;
use crate::identity::{DEFAULT_POOL_SIZE, DEFAULT_TTL};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Global cap on simultaneous network fetches.
    pub max_connections: usize,

    /// Route every fetch through the local SOCKS proxy (Tor).
    pub use_proxy: bool,

    pub proxy_host: String,

    pub proxy_port: u16,

    /// Credentials per identity batch.
    pub identity_pool_size: usize,

    /// Seconds before the whole identity batch is replaced.
    pub identity_ttl_secs: u64,

    /// One identity per feed in a refresh batch instead of one per batch.
    pub identity_per_feed: bool,

    /// Download thumbnails for entries after each refresh.
    pub fetch_thumbnails: bool,

    /// Per-request timeout in seconds. 0 = no timeout.
    pub request_timeout_secs: u64,

    /// Base address of channel feed documents.
    pub feed_base_url: String,

    /// Where the store and thumbnails live. Defaults to ~/.tubefeed.
    pub data_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            use_proxy: false,
            proxy_host: "127.0.0.1".to_string(),
            proxy_port: 9050,
            identity_pool_size: DEFAULT_POOL_SIZE,
            identity_ttl_secs: DEFAULT_TTL.as_secs(),
            identity_per_feed: false,
            fetch_thumbnails: false,
            request_timeout_secs: 0,
            feed_base_url: "https://www.youtube.com/feeds/videos.xml".to_string(),
            data_dir: None,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 11] = [
        "max_connections",
        "use_proxy",
        "proxy_host",
        "proxy_port",
        "identity_pool_size",
        "identity_ttl_secs",
        "identity_per_feed",
        "fetch_thumbnails",
        "request_timeout_secs",
        "feed_base_url",
        "data_dir",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            use_proxy = config.use_proxy,
            max_connections = config.max_connections,
            "Loaded configuration"
        );
        Ok(config)
    }

    pub fn identity_ttl(&self) -> Duration {
        Duration::from_secs(self.identity_ttl_secs)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }

    /// `data_dir`, or `<home>/.tubefeed` when unset.
    pub fn data_dir_or(&self, home: &Path) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| home.join(".tubefeed"))
    }
}

// ============================================================================
// Tests
// ============================================================================
