//! # Bridge Configuration
//!
//! Configuration management for the bridge process.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     QUEUE_COM_PORT=COM4                                                │
//! │     QUEUE_DATABASE_PATH=/var/lib/smartqueue/queue.db                   │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/smartqueue/bridge.toml (Linux)                           │
//! │     %APPDATA%\smartqueue\bridge\config\bridge.toml (Windows)           │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     COM4 / /dev/ttyUSB0 @ 57600, 3s reconnect, 0.0.0.0:8000            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # bridge.toml
//! [serial]
//! path = "COM4"
//! baud_rate = 57600
//! reconnect_delay_ms = 3000
//!
//! [store]
//! database_path = "smartqueue.db"
//! config_id = "00000000-0000-0000-0000-000000000001"
//!
//! [server]
//! bind_addr = "0.0.0.0"
//! port = 8000
//!
//! [bridge]
//! heartbeat_interval_secs = 30
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use smartqueue_core::{MAX_PEER_LINE_LEN, QUEUE_CONFIG_ID};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Serial Settings
// =============================================================================

/// Display peer connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialSettings {
    /// Serial device path (`COM4`, `/dev/ttyUSB0`).
    #[serde(default = "default_serial_path")]
    pub path: String,

    /// Line speed. Data bits, parity and stop bits are fixed at 8N1.
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Fixed delay between reconnect attempts (milliseconds).
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,

    /// Longest peer line kept; longer partial lines are discarded.
    #[serde(default = "default_max_line_len")]
    pub max_line_len: usize,
}

fn default_serial_path() -> String {
    if cfg!(windows) {
        "COM4".to_string()
    } else {
        "/dev/ttyUSB0".to_string()
    }
}

fn default_baud_rate() -> u32 {
    57600
}

fn default_reconnect_delay() -> u64 {
    3000
}

fn default_max_line_len() -> usize {
    MAX_PEER_LINE_LEN
}

impl Default for SerialSettings {
    fn default() -> Self {
        SerialSettings {
            path: default_serial_path(),
            baud_rate: default_baud_rate(),
            reconnect_delay_ms: default_reconnect_delay(),
            max_line_len: default_max_line_len(),
        }
    }
}

impl SerialSettings {
    /// Returns the reconnect delay.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

// =============================================================================
// Store Settings
// =============================================================================

/// Queue store location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Id of the configuration singleton row.
    #[serde(default = "default_config_id")]
    pub config_id: String,

    /// Maximum pooled connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("smartqueue.db")
}

fn default_config_id() -> String {
    QUEUE_CONFIG_ID.to_string()
}

fn default_max_connections() -> u32 {
    5
}

impl Default for StoreSettings {
    fn default() -> Self {
        StoreSettings {
            database_path: default_database_path(),
            config_id: default_config_id(),
            max_connections: default_max_connections(),
        }
    }
}

// =============================================================================
// Server Settings
// =============================================================================

/// Observer HTTP/WebSocket endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Bind address (default: 0.0.0.0 for all interfaces).
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Port for HTTP and `/ws`.
    #[serde(default = "default_http_port")]
    pub port: u16,
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8000
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            bind_addr: default_bind_addr(),
            port: default_http_port(),
        }
    }
}

impl ServerSettings {
    /// Returns the full bind address.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

// =============================================================================
// Bridge Settings
// =============================================================================

/// Reconciliation loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeSettings {
    /// Interval of the liveness log line (seconds).
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
}

fn default_heartbeat_interval() -> u64 {
    30
}

impl Default for BridgeSettings {
    fn default() -> Self {
        BridgeSettings {
            heartbeat_interval_secs: default_heartbeat_interval(),
        }
    }
}

impl BridgeSettings {
    /// Returns the heartbeat interval.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

// =============================================================================
// Main Bridge Configuration
// =============================================================================

/// Complete bridge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Display peer link.
    #[serde(default)]
    pub serial: SerialSettings,

    /// Queue store.
    #[serde(default)]
    pub store: StoreSettings,

    /// Observer endpoint.
    #[serde(default)]
    pub server: ServerSettings,

    /// Reconciliation loop.
    #[serde(default)]
    pub bridge: BridgeSettings,
}

impl BridgeConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (bridge.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading bridge config from file");
                let contents = std::fs::read_to_string(&path)
                    .map_err(|e| SyncError::ConfigLoadFailed(e.to_string()))?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load bridge config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Bridge config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.serial.path.trim().is_empty() {
            return Err(SyncError::InvalidConfig("serial.path must not be empty".into()));
        }

        if self.serial.baud_rate == 0 {
            return Err(SyncError::InvalidConfig(
                "serial.baud_rate must be greater than 0".into(),
            ));
        }

        if self.serial.reconnect_delay_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "serial.reconnect_delay_ms must be greater than 0".into(),
            ));
        }

        if self.serial.max_line_len == 0 {
            return Err(SyncError::InvalidConfig(
                "serial.max_line_len must be greater than 0".into(),
            ));
        }

        if self.store.config_id.is_empty() {
            return Err(SyncError::InvalidConfig("store.config_id must not be empty".into()));
        }

        if self.bridge.heartbeat_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "bridge.heartbeat_interval_secs must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("QUEUE_COM_PORT") {
            debug!(path = %path, "Overriding serial path from environment");
            self.serial.path = path;
        }

        if let Ok(baud) = std::env::var("QUEUE_BAUD_RATE") {
            match baud.parse::<u32>() {
                Ok(b) => self.serial.baud_rate = b,
                Err(_) => warn!(value = %baud, "Ignoring invalid QUEUE_BAUD_RATE"),
            }
        }

        if let Ok(delay) = std::env::var("QUEUE_RECONNECT_DELAY_MS") {
            match delay.parse::<u64>() {
                Ok(d) => self.serial.reconnect_delay_ms = d,
                Err(_) => warn!(value = %delay, "Ignoring invalid QUEUE_RECONNECT_DELAY_MS"),
            }
        }

        if let Ok(path) = std::env::var("QUEUE_DATABASE_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.store.database_path = PathBuf::from(path);
        }

        if let Ok(id) = std::env::var("QUEUE_CONFIG_ID") {
            self.store.config_id = id;
        }

        if let Ok(bind) = std::env::var("QUEUE_HTTP_BIND") {
            self.server.bind_addr = bind;
        }

        if let Ok(port) = std::env::var("QUEUE_HTTP_PORT") {
            if let Ok(p) = port.parse::<u16>() {
                debug!(port = p, "Overriding HTTP port from environment");
                self.server.port = p;
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "smartqueue")
            .map(|dirs| dirs.config_dir().join("bridge.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.serial.baud_rate, 57600);
        assert_eq!(config.serial.reconnect_delay(), Duration::from_secs(3));
        assert_eq!(config.serial.max_line_len, 256);
        assert_eq!(config.server.bind_address(), "0.0.0.0:8000");
        assert_eq!(config.store.config_id, QUEUE_CONFIG_ID);
        assert_eq!(config.bridge.heartbeat_interval(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = BridgeConfig::default();

        config.serial.baud_rate = 0;
        assert!(config.validate().is_err());

        config.serial.baud_rate = 9600;
        config.serial.path = "  ".to_string();
        assert!(config.validate().is_err());

        config.serial.path = "/dev/ttyACM0".to_string();
        config.store.config_id = String::new();
        assert!(matches!(config.validate(), Err(SyncError::InvalidConfig(_))));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: BridgeConfig = toml::from_str(
            r#"
            [serial]
            path = "COM7"

            [server]
            port = 9000
            "#,
        )
        .unwrap();

        assert_eq!(config.serial.path, "COM7");
        assert_eq!(config.serial.baud_rate, 57600);
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.bind_addr, "0.0.0.0");
        assert_eq!(config.bridge.heartbeat_interval_secs, 30);
    }

    #[test]
    fn test_toml_serialization() {
        let config = BridgeConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[serial]"));
        assert!(toml_str.contains("[store]"));
        assert!(toml_str.contains("[server]"));
    }

    #[test]
    fn test_save_then_load() {
        let path = std::env::temp_dir().join(format!(
            "smartqueue-bridge-{}.toml",
            std::process::id()
        ));
        let mut config = BridgeConfig::default();
        config.serial.path = "COM9".to_string();
        config.save(Some(path.clone())).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let loaded: BridgeConfig = toml::from_str(&contents).unwrap();
        assert_eq!(loaded.serial.path, "COM9");

        let _ = std::fs::remove_file(path);
    }
}
