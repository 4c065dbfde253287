//! Ordered status log returned to the caller at the end of a run.
//!
//! Every line is produced from an [`Event`] so the wording of each kind of
//! entry lives in one place. Only the first (`Started`) and last (`RanFor`)
//! lines are fixed for callers; the per-connection lines below are the
//! documented format for accept/close activity:
//!
//! ```text
//! Server started on {host}:{port}.
//! Accepted connection from {peer}.
//! Rejected connection from {peer}: connection limit reached.
//! Closed connection from {peer}.
//! Dropped connection from {peer}: {error}.
//! Failed to close connection from {peer}: {error}.
//! Event loop failed: {error}.
//! Ran for {run_duration} seconds.
//! ```

use std::fmt;
use std::net::SocketAddr;
use tracing::debug;

/// A loggable server event.
pub enum Event<'a> {
    Started { host: &'a str, port: u16 },
    Accepted { peer: SocketAddr },
    Rejected { peer: SocketAddr },
    /// Peer closed its end, or the connection was closed during shutdown.
    Closed { peer: SocketAddr },
    /// Torn down after a read or write error.
    Dropped { peer: SocketAddr, error: &'a dyn fmt::Display },
    CloseFailed { peer: SocketAddr, error: &'a dyn fmt::Display },
    PollFailed { error: &'a dyn fmt::Display },
    RanFor { seconds: u64 },
}

impl fmt::Display for Event<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Started { host, port } => write!(f, "Server started on {host}:{port}."),
            Event::Accepted { peer } => write!(f, "Accepted connection from {peer}."),
            Event::Rejected { peer } => {
                write!(f, "Rejected connection from {peer}: connection limit reached.")
            }
            Event::Closed { peer } => write!(f, "Closed connection from {peer}."),
            Event::Dropped { peer, error } => write!(f, "Dropped connection from {peer}: {error}."),
            Event::CloseFailed { peer, error } => {
                write!(f, "Failed to close connection from {peer}: {error}.")
            }
            Event::PollFailed { error } => write!(f, "Event loop failed: {error}."),
            Event::RanFor { seconds } => write!(f, "Ran for {seconds} seconds."),
        }
    }
}

/// Append-only sequence of status lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventLog {
    lines: Vec<String>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event, mirroring it to the tracing subscriber.
    pub fn record(&mut self, event: Event<'_>) {
        let line = event.to_string();
        debug!(event = %line, "Event recorded");
        self.lines.push(line);
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }
}

impl IntoIterator for EventLog {
    type Item = String;
    type IntoIter = std::vec::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.lines.into_iter()
    }
}
