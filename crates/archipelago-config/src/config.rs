//! Configuration structs with sensible defaults and RON persistence.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Name of the file inside the config directory.
pub const CONFIG_FILE: &str = "config.ron";

/// Top-level client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Where to connect.
    pub server: ServerConfig,
    /// Which slot to play.
    pub slot: SlotConfig,
    /// Session behaviour.
    pub client: ClientConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// `host:port`, optionally prefixed with `ws://` or `wss://`.
    pub address: String,
}

/// Slot identity sent in `Connect`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SlotConfig {
    /// Slot name.
    pub name: String,
    /// Game name. Empty for text-only clients.
    pub game: String,
    /// Room password, if the room has one.
    pub password: Option<String>,
    /// `items_handling` bitmask (0-7).
    pub items_handling: u8,
    /// Tags announced to the server.
    pub tags: Vec<String>,
}

/// Session behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Seconds to wait for each handshake reply.
    pub handshake_timeout_seconds: u64,
    /// Keep the data package cached across disconnects.
    pub retain_data_package: bool,
    /// Request missing or stale data packages during the handshake.
    pub fetch_data_package: bool,
    /// Retry with backoff when the connection drops.
    pub reconnect: bool,
    /// Give up after this many reconnection attempts.
    pub max_reconnect_attempts: u32,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log filter (e.g. "debug", "info,archipelago_client=trace"). Empty
    /// uses the logger's built-in default.
    pub log_level: String,
    /// Also write JSON logs to this directory.
    pub log_dir: Option<PathBuf>,
}

// --- Default implementations ---

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "localhost:38281".to_string(),
        }
    }
}

impl Default for SlotConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            game: String::new(),
            password: None,
            items_handling: 0b111,
            tags: Vec::new(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_seconds: 10,
            retain_data_package: true,
            fetch_data_package: true,
            reconnect: false,
            max_reconnect_attempts: 20,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: String::new(),
            log_dir: None,
        }
    }
}

impl ClientConfig {
    /// Handshake timeout as a [`Duration`].
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_seconds)
    }
}

// --- Load / Save ---

impl Config {
    /// Platform config directory for the client, if the platform has one.
    pub fn default_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("archipelago-client"))
    }

    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);

        if config_path.exists() {
            let contents =
                std::fs::read_to_string(&config_path).map_err(|source| ConfigError::ReadError {
                    path: config_path.clone(),
                    source,
                })?;
            let config: Config =
                ron::from_str(&contents).map_err(|source| ConfigError::ParseError {
                    path: config_path.clone(),
                    source,
                })?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(|source| ConfigError::WriteError {
            path: config_dir.to_path_buf(),
            source,
        })?;

        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .enumerate_arrays(false);
        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        let config_path = config_dir.join(CONFIG_FILE);
        std::fs::write(&config_path, serialized).map_err(|source| ConfigError::WriteError {
            path: config_path,
            source,
        })?;
        Ok(())
    }
}
