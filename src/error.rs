//! Error types for configuration and server runs.

use crate::event_log::EventLog;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Invalid configuration. Raised before any socket is opened.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("buffer size must be greater than zero, got {0}")]
    InvalidBufferSize(usize),

    #[error("host must not be empty")]
    EmptyHost,

    #[error("max connections must be greater than zero, got {0}")]
    InvalidMaxConnections(usize),

    #[error("poll quantum must be greater than zero")]
    InvalidPollQuantum,

    #[error("failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] io::Error),

    #[error("failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),
}

/// Errors that abort a server invocation.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The listener could not be created. No events were logged.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// The readiness poll failed. Cleanup has already run and `log`
    /// holds everything recorded up to and including shutdown.
    #[error("event loop failed: {source}")]
    Multiplexer {
        #[source]
        source: io::Error,
        log: EventLog,
    },
}

impl ServerError {
    /// The event log accumulated before the failure, if any was produced.
    pub fn log(&self) -> Option<&EventLog> {
        match self {
            ServerError::Multiplexer { log, .. } => Some(log),
            _ => None,
        }
    }
}

/// Result alias for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;
