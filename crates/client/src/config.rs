// Local configuration for the codesync client.
//
// Global config: `~/.codesync/config.toml`
// Identity: `~/.codesync/identity.toml` (see `identity.rs`)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_RELAY_URL: &str = "ws://localhost:8001";
pub const DEFAULT_API_URL: &str = "http://localhost:8000";
/// Quiet period before a local change triggers analysis.
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;
pub const DEFAULT_RECONNECT_BACKOFF_MS: u64 = 1_000;

/// Root directory for codesync state: `~/.codesync/`.
pub fn global_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".codesync"))
}

/// Path to the global config file: `~/.codesync/config.toml`.
pub fn global_config_path() -> Option<PathBuf> {
    global_dir().map(|d| d.join("config.toml"))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Room relay base URL (`ws://` or `wss://`).
    pub relay_url: String,
    /// Document and analysis API base URL.
    pub api_url: String,
    /// Overrides the display name stored with the identity.
    pub display_name: Option<String>,
    pub debounce_ms: u64,
    /// Quiet period before saving the snapshot back to storage. Unset disables
    /// persistence from this client.
    pub persist_debounce_ms: Option<u64>,
    pub reconnect_backoff_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            display_name: None,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            persist_debounce_ms: None,
            reconnect_backoff_ms: DEFAULT_RECONNECT_BACKOFF_MS,
        }
    }
}

impl ClientConfig {
    /// Load from `~/.codesync/config.toml`. Returns defaults if the file
    /// doesn't exist or can't be parsed.
    pub fn load() -> Self {
        global_config_path().and_then(|p| Self::load_from(&p).ok()).unwrap_or_default()
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let path = global_config_path().ok_or(ConfigError::NoHomeDir)?;
        self.save_to(&path)
    }

    /// Save to a specific path (creates parent directories).
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn persist_debounce(&self) -> Option<Duration> {
        self.persist_debounce_ms.map(Duration::from_millis)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("could not determine home directory")]
    NoHomeDir,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_point_at_local_services() {
        let cfg = ClientConfig::default();
        assert_eq!(cfg.relay_url, "ws://localhost:8001");
        assert_eq!(cfg.api_url, "http://localhost:8000");
        assert_eq!(cfg.debounce(), Duration::from_millis(500));
        assert_eq!(cfg.reconnect_backoff(), Duration::from_secs(1));
        assert!(cfg.persist_debounce().is_none());
    }

    #[test]
    fn round_trips_through_toml() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("nested").join("config.toml");

        let cfg = ClientConfig {
            display_name: Some("Ada".to_string()),
            persist_debounce_ms: Some(2_000),
            ..ClientConfig::default()
        };
        cfg.save_to(&path).expect("config should save");

        let loaded = ClientConfig::load_from(&path).expect("config should load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "relay_url = \"wss://relay.example.com\"\ndebounce_ms = 250\n")
            .expect("write config");

        let loaded = ClientConfig::load_from(&path).expect("config should load");
        assert_eq!(loaded.relay_url, "wss://relay.example.com");
        assert_eq!(loaded.debounce_ms, 250);
        assert_eq!(loaded.api_url, DEFAULT_API_URL);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "debounce_ms = \"soon\"").expect("write config");

        assert!(matches!(ClientConfig::load_from(&path), Err(ConfigError::Parse(_))));
    }
}
