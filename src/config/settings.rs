//! Configuration structures for socketlog

use crate::{Result, SocketLogError};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix for environment variable overrides, e.g. `SOCKETLOG_SERVER__PORT=9100`
pub const ENV_PREFIX: &str = "SOCKETLOG";

/// Smallest listen backlog the server accepts
pub const MIN_BACKLOG: u32 = 5;

/// Server configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener settings
    pub server: ServerSettings,
    /// Log store settings
    pub storage: StorageSettings,
    /// Timestamp emitter settings
    pub timestamp: TimestampSettings,
    /// Shutdown behaviour
    pub shutdown: ShutdownSettings,
    /// Diagnostic logging settings
    pub logging: LoggingSettings,
}

/// Core listener settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// IPv4 address to bind to
    pub bind_address: Ipv4Addr,
    /// TCP port to listen on (0 picks an ephemeral port)
    pub port: u16,
    /// Listen backlog
    pub backlog: u32,
    /// Receive buffer size per connection
    pub buffer_size: usize,
    /// How often the dispatch loop reaps finished handlers, in milliseconds
    pub reap_interval_ms: u64,
}

/// Log store settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Path of the shared data file
    pub data_file: PathBuf,
    /// Discard prior contents when the server starts
    pub truncate_on_start: bool,
    /// Delete the data file after a clean shutdown
    pub remove_on_shutdown: bool,
}

/// Timestamp emitter settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimestampSettings {
    /// Enable the periodic timestamp record
    pub enabled: bool,
    /// Seconds between timestamp records
    pub interval_secs: u64,
}

/// Shutdown settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownSettings {
    /// Abort handlers still connected this many seconds after shutdown starts.
    /// `None` waits for every client to disconnect.
    pub drain_timeout_secs: Option<u64>,
}

/// Diagnostic log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Diagnostic logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
    /// Output format
    pub format: LogFormat,
    /// Write diagnostics to this file instead of stderr
    pub file: Option<PathBuf>,
}

/// Client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server address, `host:port`
    pub address: String,
    /// Connect and first-byte timeout in seconds
    pub timeout_seconds: u64,
    /// Silence after which an echo is considered complete, in milliseconds
    pub idle_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: Ipv4Addr::UNSPECIFIED,
            port: 9000,
            backlog: 10,
            buffer_size: 1024,
            reap_interval_ms: 100,
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_file: PathBuf::from("/var/tmp/aesdsocketdata"),
            truncate_on_start: false,
            remove_on_shutdown: true,
        }
    }
}

impl Default for TimestampSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 10,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "socketlog=info,warn".to_string(),
            format: LogFormat::Text,
            file: None,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:9000".to_string(),
            timeout_seconds: 5,
            idle_timeout_ms: 200,
        }
    }
}

impl ServerSettings {
    /// Socket address the listener binds to
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.bind_address, self.port))
    }

    /// Reap polling period
    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms)
    }
}

impl TimestampSettings {
    /// Period between timestamp records
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl ShutdownSettings {
    /// Drain deadline, if one is configured
    pub fn drain_timeout(&self) -> Option<Duration> {
        self.drain_timeout_secs.map(Duration::from_secs)
    }
}

impl ServerConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SocketLogError::Config(format!("Failed to read config file: {}", e)))?;

        let config: ServerConfig = toml::from_str(&content)
            .map_err(|e| SocketLogError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load defaults, then an optional TOML file, then `SOCKETLOG_*` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_layered(path, None)
    }

    /// Same layering as [`ServerConfig::load`], reading `SOCKETLOG_*` keys from
    /// `env` instead of the process environment when it is given
    pub fn load_layered(
        path: Option<&Path>,
        env: Option<::config::Map<String, String>>,
    ) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                ::config::File::from(path)
                    .format(::config::FileFormat::Toml)
                    .required(true),
            );
        }

        let config: ServerConfig = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.backlog < MIN_BACKLOG {
            return Err(SocketLogError::Config(format!(
                "Listen backlog must be at least {}",
                MIN_BACKLOG
            )));
        }
        if self.server.buffer_size == 0 {
            return Err(SocketLogError::Config("Buffer size cannot be zero".to_string()));
        }
        if self.server.reap_interval_ms == 0 {
            return Err(SocketLogError::Config("Reap interval cannot be zero".to_string()));
        }
        if self.storage.data_file.as_os_str().is_empty() {
            return Err(SocketLogError::Config("Data file path cannot be empty".to_string()));
        }
        if self.timestamp.enabled && self.timestamp.interval_secs == 0 {
            return Err(SocketLogError::Config(
                "Timestamp interval cannot be zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl ClientConfig {
    /// Connect timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Echo idle timeout
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.address.is_empty() {
            return Err(SocketLogError::Config("Server address cannot be empty".to_string()));
        }
        if self.timeout_seconds == 0 {
            return Err(SocketLogError::Config("Timeout cannot be zero".to_string()));
        }
        Ok(())
    }
}
