//! # Configuration Management
//!
//! Centralized configuration for the intercepting proxy.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()` / `from_toml()`
//! - Environment variables (`INTERCEPT_TUNNEL_*`) via `from_env()`
//! - Direct instantiation with defaults
//!
//! ## Notes
//! - The client compression threshold is independent of whatever the real
//!   server chooses; every packet is re-framed per leg.
//! - `auxiliary.handshake_timeout` bounds how long a login may wait on the
//!   helper process for shared-secret candidates.

use crate::error::{ProtocolError, Result};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Protocol version the typed packets follow (1.8)
pub const PROTOCOL_VERSION: i32 = 47;

/// Largest frame accepted on a leg: the 3-byte VarInt limit
pub const MAX_PACKET_SIZE: usize = 2_097_151;

/// Threshold the proxy announces to the client after encryption is enabled
pub const CLIENT_COMPRESSION_THRESHOLD: i32 = 1024;

/// Main proxy configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ProxyConfig {
    /// Game listener and upstream settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Auxiliary channel settings
    #[serde(default)]
    pub auxiliary: AuxiliaryConfig,

    /// Per-leg framing settings
    #[serde(default)]
    pub transport: TransportConfig,

    /// Built-in module settings
    #[serde(default)]
    pub modules: ModulesConfig,

    /// Feature entitlements
    #[serde(default)]
    pub licenses: LicenseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ProxyConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env();
        Ok(config)
    }

    /// Override fields from `INTERCEPT_TUNNEL_*` environment variables
    pub fn apply_env(&mut self) {
        if let Ok(addr) = std::env::var("INTERCEPT_TUNNEL_LISTEN_ADDRESS") {
            self.server.listen_address = addr;
        }

        if let Ok(addr) = std::env::var("INTERCEPT_TUNNEL_UPSTREAM_ADDRESS") {
            self.server.upstream_address = addr;
        }

        if let Ok(addr) = std::env::var("INTERCEPT_TUNNEL_AUXILIARY_ADDRESS") {
            self.auxiliary.listen_address = addr;
        }

        if let Ok(interval) = std::env::var("INTERCEPT_TUNNEL_KEEPALIVE_INTERVAL_MS") {
            if let Ok(val) = interval.parse::<u64>() {
                self.auxiliary.keepalive_interval = Duration::from_millis(val);
            }
        }

        if let Ok(timeout) = std::env::var("INTERCEPT_TUNNEL_HANDSHAKE_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                self.auxiliary.handshake_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(threshold) = std::env::var("INTERCEPT_TUNNEL_COMPRESSION_THRESHOLD") {
            if let Ok(val) = threshold.parse::<i32>() {
                self.transport.client_compression_threshold = val;
            }
        }

        if let Ok(dev) = std::env::var("INTERCEPT_TUNNEL_DEVELOPMENT_MODE") {
            self.licenses.development_mode = matches!(dev.as_str(), "1" | "true" | "yes");
        }
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.auxiliary.validate());
        errors.extend(self.transport.validate());
        errors.extend(self.modules.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Game listener and upstream configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Address players connect to (e.g., "0.0.0.0:25565")
    pub listen_address: String,

    /// Real game server, as "host:port"
    pub upstream_address: String,

    /// Timeout for dialing the upstream server
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Timeout for graceful shutdown
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,

    /// Maximum number of concurrent tunnels
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: String::from("0.0.0.0:25565"),
            upstream_address: String::from("127.0.0.1:25566"),
            connect_timeout: timeout::DEFAULT_TIMEOUT,
            shutdown_timeout: timeout::SHUTDOWN_TIMEOUT,
            max_connections: 256,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.listen_address.is_empty() {
            errors.push("Listen address cannot be empty".to_string());
        } else if self.listen_address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid listen address format: '{}' (expected format: '0.0.0.0:25565')",
                self.listen_address
            ));
        }

        if self.upstream_address.is_empty() {
            errors.push("Upstream address cannot be empty".to_string());
        } else if split_host_port(&self.upstream_address).is_none() {
            errors.push(format!(
                "Invalid upstream address format: '{}' (expected format: 'mc.example.net:25565')",
                self.upstream_address
            ));
        }

        if self.connect_timeout.as_millis() < 100 {
            errors.push("Connect timeout too short (minimum: 100ms)".to_string());
        } else if self.connect_timeout.as_secs() > 300 {
            errors.push("Connect timeout too long (maximum: 300s)".to_string());
        }

        if self.shutdown_timeout.as_secs() < 1 {
            errors.push("Shutdown timeout too short (minimum: 1s)".to_string());
        } else if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        }

        errors
    }

    /// Upstream host and port, as written into rewritten Handshake packets
    pub fn upstream_host_port(&self) -> Option<(String, u16)> {
        split_host_port(&self.upstream_address)
    }
}

/// Auxiliary channel configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuxiliaryConfig {
    /// Address helper processes connect to
    pub listen_address: String,

    /// Interval between keep-alive requests; two missed periods close the channel
    #[serde(with = "duration_serde")]
    pub keepalive_interval: Duration,

    /// How long a login waits on a handoff slot
    #[serde(with = "duration_serde")]
    pub handshake_timeout: Duration,
}

impl Default for AuxiliaryConfig {
    fn default() -> Self {
        Self {
            listen_address: String::from("127.0.0.1:25580"),
            keepalive_interval: timeout::KEEPALIVE_INTERVAL,
            handshake_timeout: timeout::HANDSHAKE_TIMEOUT,
        }
    }
}

impl AuxiliaryConfig {
    /// Validate auxiliary configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.listen_address.is_empty() {
            errors.push("Auxiliary listen address cannot be empty".to_string());
        } else if self.listen_address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid auxiliary listen address format: '{}' (expected format: '127.0.0.1:25580')",
                self.listen_address
            ));
        }

        if self.keepalive_interval.as_millis() < 10 {
            errors.push("Keep-alive interval too short (minimum: 10ms)".to_string());
        } else if self.keepalive_interval.as_secs() > 3600 {
            errors.push("Keep-alive interval too long (maximum: 1 hour)".to_string());
        }

        if self.handshake_timeout.as_millis() < 10 {
            errors.push("Handshake timeout too short (minimum: 10ms)".to_string());
        } else if self.handshake_timeout.as_secs() > 300 {
            errors.push("Handshake timeout too long (maximum: 300s)".to_string());
        }

        errors
    }
}

/// Per-leg framing configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    /// Threshold sent to the client in SetCompression; negative disables compression
    pub client_compression_threshold: i32,

    /// Maximum frame size accepted or produced on either leg
    pub max_packet_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            client_compression_threshold: CLIENT_COMPRESSION_THRESHOLD,
            max_packet_size: MAX_PACKET_SIZE,
        }
    }
}

impl TransportConfig {
    /// Validate transport configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_packet_size < 1024 {
            errors.push("Max packet size too small (minimum: 1 KB)".to_string());
        } else if self.max_packet_size > MAX_PACKET_SIZE {
            errors.push(format!(
                "Max packet size too large: {} bytes (maximum: {MAX_PACKET_SIZE})",
                self.max_packet_size
            ));
        }

        if self.client_compression_threshold >= 0
            && self.client_compression_threshold as usize > self.max_packet_size
        {
            errors.push(
                "Client compression threshold cannot be larger than max packet size".to_string(),
            );
        }

        errors
    }

    /// Threshold as applied to a codec; `None` when compression is disabled
    pub fn client_threshold(&self) -> Option<usize> {
        usize::try_from(self.client_compression_threshold).ok()
    }
}

/// Built-in module settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModulesConfig {
    /// Chat line sent by the spammer module
    pub spammer_message: String,

    /// Interval between spammer messages
    #[serde(with = "duration_serde")]
    pub spammer_interval: Duration,

    /// Flying speed pushed by the flight module
    pub flight_speed: f32,
}

impl Default for ModulesConfig {
    fn default() -> Self {
        Self {
            spammer_message: String::from("Hello from the other side"),
            spammer_interval: Duration::from_secs(20),
            flight_speed: 0.05,
        }
    }
}

impl ModulesConfig {
    /// Validate module configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.spammer_message.is_empty() {
            errors.push("Spammer message cannot be empty".to_string());
        } else if self.spammer_message.chars().count() > 100 {
            errors.push("Spammer message too long (maximum: 100 characters)".to_string());
        }

        if self.spammer_interval.as_millis() < 10 {
            errors.push("Spammer interval too short (minimum: 10ms)".to_string());
        }

        if !(self.flight_speed > 0.0 && self.flight_speed <= 10.0) {
            errors.push(format!(
                "Invalid flight speed: {} (valid range: (0, 10])",
                self.flight_speed
            ));
        }

        errors
    }
}

/// Feature entitlements keyed by auxiliary auth key
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct LicenseConfig {
    /// Grant every feature to every helper regardless of its auth key
    #[serde(default)]
    pub development_mode: bool,

    /// Auth key to feature bitmask
    #[serde(default)]
    pub keys: HashMap<String, u64>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("intercept-tunnel"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        if self.log_to_file {
            if let Some(ref path) = self.log_file_path {
                if let Some(parent) = Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "Log file directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            } else {
                errors.push("log_file_path must be specified when log_to_file is true".to_string());
            }
        }

        if !self.log_to_console && !self.log_to_file {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
        }

        errors
    }
}

/// Split "host:port", accepting hostnames as well as IP literals.
fn split_host_port(address: &str) -> Option<(String, u16)> {
    let (host, port) = address.rsplit_once(':')?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return None;
    }
    let port = port.parse::<u16>().ok()?;
    Some((host.to_string(), port))
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_host_port() {
        assert_eq!(
            split_host_port("mc.example.net:25565"),
            Some(("mc.example.net".to_string(), 25565))
        );
        assert_eq!(
            split_host_port("[::1]:25565"),
            Some(("::1".to_string(), 25565))
        );
        assert_eq!(split_host_port("no-port"), None);
        assert_eq!(split_host_port(":25565"), None);
    }
}
