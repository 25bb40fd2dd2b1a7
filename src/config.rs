//! Configuration for flowslice.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::capture::InputOrder;

/// Main configuration for the acquisition pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// External tool names
    pub tools: ToolConfig,

    /// NetFlow collector endpoint
    pub collector: CollectorConfig,

    /// Packet capture input (a single file or a directory of captures)
    pub pcap_path: PathBuf,

    /// Directory that receives rotated nfcapd files
    pub store_dir: PathBuf,

    /// Canonical name of the finished flow file inside `store_dir`
    pub store_name: String,

    /// Directory for raw-field CSV exports
    pub csv_dir: PathBuf,

    /// Path for storing state and activity logs
    pub data_path: PathBuf,

    /// Length of each queried time slice
    #[serde(with = "duration_serde")]
    pub window_length: Duration,

    /// Offset between consecutive slice starts
    #[serde(with = "duration_serde")]
    pub stride: Duration,

    /// Deadline for a single nfdump or softflowd call (0 disables it)
    #[serde(with = "duration_serde")]
    pub query_timeout: Duration,

    /// Pause between stopping nfcapd and picking up its last file
    #[serde(with = "duration_serde")]
    pub settle_time: Duration,

    /// Order in which a directory of captures is replayed
    pub input_order: InputOrder,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("flowslice");

        Self {
            tools: ToolConfig::default(),
            collector: CollectorConfig::default(),
            pcap_path: PathBuf::from("./pcaps/sample_file"),
            store_dir: PathBuf::from("./nfdumps"),
            store_name: "sample_file".to_string(),
            csv_dir: PathBuf::from("./datasets/custom"),
            data_path: data_dir,
            window_length: Duration::from_secs(1),
            stride: Duration::from_secs(60),
            query_timeout: Duration::from_secs(120),
            settle_time: Duration::from_secs(1),
            input_order: InputOrder::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from an explicit file, falling back to defaults
    /// when the file does not exist.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("flowslice")
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.store_dir)?;
        std::fs::create_dir_all(&self.csv_dir)?;
        std::fs::create_dir_all(&self.data_path)?;
        Ok(())
    }

    /// Reject values the slicer and runner cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_length.is_zero() {
            return Err(ConfigError::Invalid("window_length must be positive".into()));
        }
        if self.stride.is_zero() {
            return Err(ConfigError::Invalid("stride must be positive".into()));
        }
        if self.store_name.is_empty() {
            return Err(ConfigError::Invalid("store_name must not be empty".into()));
        }
        Ok(())
    }

    /// Full path of the canonical flow file.
    pub fn store_path(&self) -> PathBuf {
        self.store_dir.join(&self.store_name)
    }

    /// Per-call deadline, `None` when disabled.
    pub fn timeout(&self) -> Option<Duration> {
        (!self.query_timeout.is_zero()).then_some(self.query_timeout)
    }
}

/// Names of the external programs driven by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// NetFlow capture daemon
    pub daemon: String,
    /// pcap to NetFlow exporter
    pub exporter: String,
    /// Flow query engine
    pub engine: String,
    /// Prefix kill commands with `sudo`
    pub kill_with_sudo: bool,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            daemon: "nfcapd".to_string(),
            exporter: "softflowd".to_string(),
            engine: "nfdump".to_string(),
            kill_with_sudo: false,
        }
    }
}

/// Address the exporter sends NetFlow to and the daemon listens on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub address: String,
    pub port: u16,
    /// nfcapd file rotation interval
    #[serde(with = "duration_serde")]
    pub rotation_interval: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 9995,
            rotation_interval: Duration::from_secs(600),
        }
    }
}

impl CollectorConfig {
    /// `address:port` as passed to the exporter.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("Invalid value: {0}")]
    Invalid(String),
}

/// Serde support for Duration.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
