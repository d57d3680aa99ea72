//! Configuration management for MediaFerry.
//!
//! ## Configuration File Locations
//!
//! | Platform | Path |
//! |----------|------|
//! | Linux | `~/.config/mediaferry/config.toml` |
//! | macOS | `~/Library/Application Support/com.mediaferry.MediaFerry/config.toml` |
//! | Windows | `%APPDATA%\mediaferry\MediaFerry\config\config.toml` |
//!
//! ## Example
//!
//! ```rust,ignore
//! use mediaferry_core::config::Config;
//!
//! let config = Config::load()?;
//! println!("Line protocol port: {}", config.line.port);
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main configuration struct for MediaFerry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,
    /// HTTP transport settings
    pub http: HttpConfig,
    /// Line-protocol transport settings
    pub line: LineConfig,
    /// History and session log settings
    pub history: HistoryConfig,
    /// Progress reporting settings
    pub progress: ProgressConfig,
}

/// General configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Name shown on the HTML listing page
    pub device_name: String,
    /// Directory for `history.json` and `session.json` (platform data dir if unset)
    pub data_dir: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            device_name: hostname::get().map_or_else(
                |_| "MediaFerry Device".to_string(),
                |h| h.to_string_lossy().to_string(),
            ),
            data_dir: None,
        }
    }
}

/// HTTP transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Listening port
    pub port: u16,
    /// Only accept connections from this machine
    pub localhost_only: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: crate::DEFAULT_HTTP_PORT,
            localhost_only: false,
        }
    }
}

/// Line-protocol transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LineConfig {
    /// Listening port
    pub port: u16,
    /// Only accept connections from this machine (e.g. behind `adb forward`)
    pub localhost_only: bool,
    /// Read/write buffer size in bytes
    pub buffer_size: usize,
    /// Bytes streamed between two persisted resume offsets
    pub checkpoint_bytes: u64,
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            port: crate::DEFAULT_LINE_PORT,
            localhost_only: false,
            buffer_size: crate::LINE_BUFFER_SIZE,
            checkpoint_bytes: crate::DEFAULT_CHECKPOINT_BYTES,
        }
    }
}

/// History configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Skip assets already in the history ledger by default
    pub incremental: bool,
    /// Record every fully served asset into the history ledger
    pub record_on_complete: bool,
    /// Finished sessions kept in the session log
    pub max_sessions: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            incremental: false,
            record_on_complete: true,
            max_sessions: crate::DEFAULT_MAX_SESSIONS,
        }
    }
}

/// Progress reporting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    /// Minimum time between two throughput samples
    #[serde(with = "humantime_serde")]
    pub throughput_window: Duration,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            throughput_window: Duration::from_secs(1),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// If the configuration file doesn't exist, returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| Error::ConfigError(format!("Failed to read config: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config: {e}")))
    }

    /// Save configuration to the default location.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::ConfigError(format!("Failed to create config directory: {e}"))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(&path, content)
            .map_err(|e| Error::ConfigError(format!("Failed to write config: {e}")))
    }

    /// Get the default configuration directory path.
    #[must_use]
    pub fn config_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "mediaferry", "MediaFerry")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the full path to the configuration file.
    #[must_use]
    pub fn config_path() -> PathBuf {
        Self::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }

    /// Directory holding the persisted history and session state.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.general
            .data_dir
            .clone()
            .unwrap_or_else(crate::default_data_dir)
    }

    /// Path of the history ledger file.
    #[must_use]
    pub fn history_path(&self) -> PathBuf {
        self.data_dir().join(crate::HISTORY_FILE_NAME)
    }

    /// Path of the session state file.
    #[must_use]
    pub fn session_path(&self) -> PathBuf {
        self.data_dir().join(crate::SESSION_FILE_NAME)
    }
}

/// Address a transport binds to.
pub(crate) fn bind_addr(port: u16, localhost_only: bool) -> SocketAddr {
    let ip = if localhost_only {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    } else {
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    };
    SocketAddr::new(ip, port)
}

mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.strip_suffix("ms")
            .map(|millis| {
                millis
                    .parse()
                    .map(Duration::from_millis)
                    .map_err(serde::de::Error::custom)
            })
            .or_else(|| {
                s.strip_suffix('s').map(|secs| {
                    secs.parse()
                        .map(Duration::from_secs)
                        .map_err(serde::de::Error::custom)
                })
            })
            .or_else(|| {
                s.strip_suffix('m').map(|mins| {
                    mins.parse::<u64>()
                        .map(|m| Duration::from_secs(m * 60))
                        .map_err(serde::de::Error::custom)
                })
            })
            .unwrap_or_else(|| Err(serde::de::Error::custom("invalid duration format")))
    }
}
