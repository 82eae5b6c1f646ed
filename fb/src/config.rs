//! Fleetbus configuration types and loading

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Main fleetbus configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bus endpoints and polling
    pub bus: BusConfig,

    /// Protocol timeouts
    pub timeouts: TimeoutConfig,

    /// Logging
    pub log: LogConfig,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .fleetbus.yml
        let local_config = PathBuf::from(".fleetbus.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/fleetbus/fleetbus.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("fleetbus").join("fleetbus.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the logging section, before logging is initialized
    ///
    /// Follows the same fallback chain as [`Config::load`] but swallows errors: a broken config
    /// file is reported by [`Config::load`] once the log file is open.
    pub fn load_log_config(config_path: Option<&PathBuf>) -> LogConfig {
        let candidates = match config_path {
            Some(path) => vec![path.clone()],
            None => {
                let mut paths = vec![PathBuf::from(".fleetbus.yml")];
                if let Some(config_dir) = dirs::config_dir() {
                    paths.push(config_dir.join("fleetbus").join("fleetbus.yml"));
                }
                paths
            }
        };

        candidates
            .iter()
            .filter(|p| p.exists())
            .find_map(|p| Self::load_from_file(p).ok())
            .map(|c| c.log)
            .unwrap_or_default()
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Bus endpoints, named from the broker's point of view
///
/// The broker binds `send_port` to publish commands and `recv_port` to collect replies.
/// Workers connect to the same two ports in the mirrored roles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Address the broker publishes on
    #[serde(rename = "send-address")]
    pub send_address: String,

    /// Port the broker publishes on (workers subscribe here)
    #[serde(rename = "send-port")]
    pub send_port: u16,

    /// Address the broker receives on
    #[serde(rename = "recv-address")]
    pub recv_address: String,

    /// Port the broker receives on (workers publish here)
    #[serde(rename = "recv-port")]
    pub recv_port: u16,

    /// Single receive poll in milliseconds
    #[serde(rename = "poll-interval-ms")]
    pub poll_interval_ms: u64,

    /// Readiness ping period in milliseconds
    #[serde(rename = "ping-interval-ms")]
    pub ping_interval_ms: u64,

    /// How long a worker keeps retrying its connection in milliseconds
    #[serde(rename = "connect-timeout-ms")]
    pub connect_timeout_ms: u64,

    /// Max encoded envelope size in bytes
    #[serde(rename = "max-frame-bytes")]
    pub max_frame_bytes: usize,

    /// Buffered envelopes per channel
    #[serde(rename = "channel-capacity")]
    pub channel_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            send_address: "127.0.0.1".to_string(),
            send_port: 5555,
            recv_address: "127.0.0.1".to_string(),
            recv_port: 5556,
            poll_interval_ms: 10,
            ping_interval_ms: 1000,
            connect_timeout_ms: 5000,
            max_frame_bytes: 1024 * 1024, // 1MB
            channel_capacity: 1024,
        }
    }
}

impl BusConfig {
    pub fn send_endpoint(&self) -> String {
        format!("{}:{}", self.send_address, self.send_port)
    }

    pub fn recv_endpoint(&self) -> String {
        format!("{}:{}", self.recv_address, self.recv_port)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Same bus on different ports
    pub fn with_ports(&self, send_port: u16, recv_port: u16) -> Self {
        debug!(send_port, recv_port, "BusConfig::with_ports: called");
        Self {
            send_port,
            recv_port,
            ..self.clone()
        }
    }
}

/// Protocol timeouts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Readiness handshake timeout in milliseconds
    #[serde(rename = "ready-ms")]
    pub ready_ms: u64,

    /// Coordinated shutdown timeout in milliseconds
    #[serde(rename = "close-ms")]
    pub close_ms: u64,

    /// Default reply timeout in milliseconds
    #[serde(rename = "call-ms")]
    pub call_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            ready_ms: 10_000,
            close_ms: 10_000,
            call_ms: 10_000,
        }
    }
}

impl TimeoutConfig {
    pub fn ready(&self) -> Duration {
        Duration::from_millis(self.ready_ms)
    }

    pub fn close(&self) -> Duration {
        Duration::from_millis(self.close_ms)
    }

    pub fn call(&self) -> Duration {
        Duration::from_millis(self.call_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: Option<String>,

    /// Directory for per-process log files
    pub dir: Option<PathBuf>,
}

impl LogConfig {
    /// Resolved log directory
    pub fn dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("fleetbus")
                .join("logs")
        })
    }
}
