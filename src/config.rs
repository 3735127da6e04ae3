//! # Bridge Configuration
//!
//! Every section and field has a default, so an empty file is a valid
//! configuration.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [serial]
//! port = "/dev/ttyUSB0"
//! baud = 250000
//!
//! [protocol]
//! queue_capacity = 32
//! ack_timeout_ms = 5000
//! flow_control = { windowed = { depth = 3 } }
//!
//! [poller]
//! interval_ms = 500
//!
//! [feeder]
//! shutdown_sequence = ["M104 S0", "M140 S0", "G28 X Y", "M84"]
//!
//! [web]
//! bind = "0.0.0.0:8080"
//! gcode_dir = "./gcode"
//! ```
//!
//! ## Example: Rust Usage
//!
//! ```rust
//! use printlink_rs::config::Config;
//! use printlink_rs::protocol::engine::FlowControl;
//! let config: Config = toml::from_str(r#"
//! [protocol]
//! flow_control = { windowed = { depth = 3 } }
//! "#).unwrap();
//! assert_eq!(config.protocol.flow_control, FlowControl::Windowed { depth: 3 });
//! assert!(config.validate().is_ok());
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::protocol::engine::FlowControl;
use crate::protocol::queue::{self, DEFAULT_CAPACITY};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub feeder: FeederConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Board serial link.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SerialConfig {
    #[serde(default = "default_port")]
    pub port: String,
    #[serde(default = "default_baud")]
    pub baud: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud: default_baud(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProtocolConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    #[serde(default = "default_read_poll_ms")]
    pub read_poll_ms: u64,
    #[serde(default)]
    pub flow_control: FlowControl,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            ack_timeout_ms: default_ack_timeout_ms(),
            read_poll_ms: default_read_poll_ms(),
            flow_control: FlowControl::default(),
        }
    }
}

impl ProtocolConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn read_poll(&self) -> Duration {
        Duration::from_millis(self.read_poll_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PollerConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_status_command")]
    pub command: String,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval_ms(),
            command: default_status_command(),
        }
    }
}

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeederConfig {
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_idle_delay_ms")]
    pub idle_delay_ms: u64,
    #[serde(default = "default_shutdown_sequence")]
    pub shutdown_sequence: Vec<String>,
}

impl Default for FeederConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: default_retry_delay_ms(),
            idle_delay_ms: default_idle_delay_ms(),
            shutdown_sequence: default_shutdown_sequence(),
        }
    }
}

impl FeederConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn idle_delay(&self) -> Duration {
        Duration::from_millis(self.idle_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_gcode_dir")]
    pub gcode_dir: PathBuf,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            gcode_dir: default_gcode_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Zero disables the periodic diagnostic log.
    #[serde(default)]
    pub diagnostics_interval_ms: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            diagnostics_interval_ms: 0,
        }
    }
}

impl LoggingConfig {
    pub fn max_level(&self) -> Result<tracing::Level, ConfigError> {
        tracing::Level::from_str(&self.level)
            .map_err(|_| ConfigError::Invalid(format!("unknown log level '{}'", self.level)))
    }

    pub fn diagnostics_interval(&self) -> Option<Duration> {
        (self.diagnostics_interval_ms > 0).then(|| Duration::from_millis(self.diagnostics_interval_ms))
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));
        if self.serial.baud == 0 {
            return invalid("serial.baud must be > 0".to_string());
        }
        if self.protocol.queue_capacity < 2 {
            return invalid("protocol.queue_capacity must be at least 2".to_string());
        }
        if self.protocol.ack_timeout_ms == 0 {
            return invalid("protocol.ack_timeout_ms must be > 0".to_string());
        }
        if let FlowControl::Windowed { depth } = self.protocol.flow_control {
            if depth == 0 {
                return invalid("protocol.flow_control window depth must be > 0".to_string());
            }
        }
        if self.poller.interval_ms == 0 {
            return invalid("poller.interval_ms must be > 0".to_string());
        }
        if let Err(e) = queue::normalize(&self.poller.command) {
            return invalid(format!("poller.command: {}", e));
        }
        if self.feeder.retry_delay_ms == 0 || self.feeder.idle_delay_ms == 0 {
            return invalid("feeder delays must be > 0".to_string());
        }
        for line in &self.feeder.shutdown_sequence {
            if let Err(e) = queue::normalize(line) {
                return invalid(format!("feeder.shutdown_sequence '{}': {}", line, e));
            }
        }
        self.logging.max_level()?;
        Ok(())
    }
}

// Default value functions
fn default_port() -> String { "/dev/ttyUSB0".to_string() }
fn default_baud() -> u32 { 250000 }
fn default_queue_capacity() -> usize { DEFAULT_CAPACITY }
fn default_ack_timeout_ms() -> u64 { 5000 }
fn default_read_poll_ms() -> u64 { 1 }
fn default_poll_interval_ms() -> u64 { 500 }
fn default_status_command() -> String { "M105".to_string() }
fn default_retry_delay_ms() -> u64 { 100 }
fn default_idle_delay_ms() -> u64 { 100 }
fn default_bind() -> String { "0.0.0.0:8080".to_string() }
fn default_gcode_dir() -> PathBuf { PathBuf::from("./gcode") }
fn default_log_level() -> String { "info".to_string() }

/// Cool hotend, cool bed, home X/Y, disable motors.
pub fn default_shutdown_sequence() -> Vec<String> {
    ["M104 S0", "M140 S0", "G28 X Y", "M84"]
        .iter()
        .map(|line| line.to_string())
        .collect()
}

/// Load and validate configuration from a TOML file at the given path.
pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let config: Config = match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("Failed to parse config TOML: {}", e);
                return Err(ConfigError::Toml(e));
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path, e);
            return Err(ConfigError::Io(e));
        }
    };
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.serial.baud, 250000);
        assert_eq!(config.protocol.queue_capacity, 32);
        assert_eq!(config.protocol.ack_timeout(), Duration::from_secs(5));
        assert_eq!(config.protocol.flow_control, FlowControl::Strict);
        assert_eq!(config.poller.interval(), Duration::from_millis(500));
        assert_eq!(config.poller.command, "M105");
        assert_eq!(config.feeder.shutdown_sequence, ["M104 S0", "M140 S0", "G28 X Y", "M84"]);
        assert_eq!(config.logging.diagnostics_interval(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_config_success() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("test_config.toml");
        let mut file = File::create(&file_path).unwrap();
        writeln!(file, "[serial]\nport = '/dev/ttyACM0'\nbaud = 115200").unwrap();
        writeln!(file, "[protocol]\nflow_control = 'strict'\nack_timeout_ms = 2000").unwrap();
        file.flush().unwrap();
        let config = load_config(file_path.to_str().unwrap()).unwrap();
        assert_eq!(config.serial.port, "/dev/ttyACM0");
        assert_eq!(config.serial.baud, 115200);
        assert_eq!(config.protocol.ack_timeout_ms, 2000);
        // Defaults for missing fields
        assert_eq!(config.protocol.queue_capacity, 32);
        assert_eq!(config.web.bind, "0.0.0.0:8080");
    }

    #[test]
    fn test_windowed_flow_control_parsing() {
        let toml = r#"
        [protocol]
        flow_control = { windowed = { depth = 4 } }
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.protocol.flow_control, FlowControl::Windowed { depth: 4 });
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config("nonexistent_file.toml");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("bad.toml");
        let mut file = File::create(&file_path).unwrap();
        writeln!(file, "not a valid toml").unwrap();
        file.flush().unwrap();
        let result = load_config(file_path.to_str().unwrap());
        assert!(matches!(result, Err(ConfigError::Toml(_))));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.protocol.queue_capacity = 1;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.protocol.flow_control = FlowControl::Windowed { depth: 0 };
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.feeder.shutdown_sequence.push("M117 ".to_string() + &"x".repeat(80));
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }
}
