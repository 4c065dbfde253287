//! Configuration for the timed echo server.
//!
//! `ServerConfig` is the immutable per-invocation configuration consumed by
//! the library. The binary builds one from command-line arguments and an
//! optional TOML file; CLI arguments take precedence over file values.

use crate::error::ConfigError;
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Default upper bound on a single readiness poll.
pub const DEFAULT_POLL_QUANTUM: Duration = Duration::from_millis(50);

/// Default cap on simultaneously open client connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 1024;

/// Configuration for a single server invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host name or address to bind to.
    pub host: String,
    /// Port to bind to (0 picks an ephemeral port).
    pub port: u16,
    /// Maximum bytes read from a client per read call.
    pub buffer_size: usize,
    /// Wall-clock budget for the whole run, in whole seconds.
    pub run_duration: u64,
    /// Connections beyond this count are accepted and immediately dropped.
    pub max_connections: usize,
    /// Upper bound on how long one poll call may wait.
    pub poll_quantum: Duration,
}

impl ServerConfig {
    /// Build a config with default connection limit and poll quantum.
    pub fn new(host: impl Into<String>, port: u16, buffer_size: usize, run_duration: u64) -> Self {
        Self {
            host: host.into(),
            port,
            buffer_size,
            run_duration,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            poll_quantum: DEFAULT_POLL_QUANTUM,
        }
    }

    /// Set the connection limit.
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Set the poll quantum.
    pub fn with_poll_quantum(mut self, poll_quantum: Duration) -> Self {
        self.poll_quantum = poll_quantum;
        self
    }

    /// The run duration as a `Duration`.
    pub fn run_duration(&self) -> Duration {
        Duration::from_secs(self.run_duration)
    }

    /// Check the invariants that must hold before any socket is opened.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::InvalidBufferSize(self.buffer_size));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(self.max_connections));
        }
        if self.poll_quantum.is_zero() {
            return Err(ConfigError::InvalidPollQuantum);
        }
        Ok(())
    }
}

/// Command-line arguments for the echo server binary
#[derive(Parser, Debug)]
#[command(name = "timed-echo")]
#[command(author = "timed-echo authors")]
#[command(version = "0.1.0")]
#[command(about = "A time-bounded TCP echo server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host to bind to (e.g., 127.0.0.1)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Maximum bytes read per client read call
    #[arg(short, long)]
    pub buffer_size: Option<usize>,

    /// How long to run before shutting down, in seconds
    #[arg(short = 'd', long)]
    pub run_duration: Option<u64>,

    /// Maximum simultaneously open client connections
    #[arg(short = 'm', long)]
    pub max_connections: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub io: IoSection,
    #[serde(default)]
    pub run: RunSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Listening endpoint configuration
#[derive(Debug, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_connections: default_max_connections(),
        }
    }
}

/// Read/poll tuning
#[derive(Debug, Deserialize)]
pub struct IoSection {
    /// Maximum bytes per read call
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Poll quantum in milliseconds
    #[serde(default = "default_poll_quantum_ms")]
    pub poll_quantum_ms: u64,
}

impl Default for IoSection {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            poll_quantum_ms: default_poll_quantum_ms(),
        }
    }
}

/// Run budget
#[derive(Debug, Deserialize)]
pub struct RunSection {
    /// Run duration in seconds
    #[serde(default = "default_run_duration")]
    pub duration: u64,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            duration: default_run_duration(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    7007
}

fn default_max_connections() -> usize {
    DEFAULT_MAX_CONNECTIONS
}

fn default_buffer_size() -> usize {
    1024
}

fn default_poll_quantum_ms() -> u64 {
    DEFAULT_POLL_QUANTUM.as_millis() as u64
}

fn default_run_duration() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Fully resolved configuration for the binary.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub log_level: String,
}

impl AppConfig {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    /// Merge parsed CLI args over the TOML file they point at, if any.
    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = match cli.config {
            Some(ref config_path) => {
                let contents = std::fs::read_to_string(config_path)
                    .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
                toml::from_str(&contents)
                    .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
            }
            None => TomlConfig::default(),
        };

        Ok(Self::merge(cli, toml_config))
    }

    fn merge(cli: CliArgs, file: TomlConfig) -> Self {
        let server = ServerConfig {
            host: cli.host.unwrap_or(file.server.host),
            port: cli.port.unwrap_or(file.server.port),
            buffer_size: cli.buffer_size.unwrap_or(file.io.buffer_size),
            run_duration: cli.run_duration.unwrap_or(file.run.duration),
            max_connections: cli.max_connections.unwrap_or(file.server.max_connections),
            poll_quantum: Duration::from_millis(file.io.poll_quantum_ms),
        };

        let log_level = if cli.log_level != "info" {
            cli.log_level
        } else {
            file.logging.level
        };

        Self { server, log_level }
    }
}
