//! timed-echo: a time-bounded TCP echo server.
//!
//! One thread multiplexes the listener and every client over a single
//! readiness poll (epoll on Linux, kqueue on macOS). Received bytes are
//! echoed back unchanged. When the configured run duration elapses, every
//! socket is closed and the ordered event log is returned to the caller.
//!
//! ```no_run
//! let log = timed_echo::start("127.0.0.1", 54321, 1024, 1)?;
//! assert_eq!(log.first().map(String::as_str), Some("Server started on 127.0.0.1:54321."));
//! assert_eq!(log.last().map(String::as_str), Some("Ran for 1 seconds."));
//! # Ok::<(), timed_echo::ServerError>(())
//! ```

pub mod config;
pub mod deadline;
pub mod error;
pub mod event_log;
pub mod event_loop;
pub mod listener;
pub mod registry;
pub mod server;
pub mod shutdown;

pub use config::ServerConfig;
pub use error::{ConfigError, ServerError};
pub use event_log::EventLog;
pub use server::{run, start, Server};
