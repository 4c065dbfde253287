//! timed-echo: run a time-bounded TCP echo server from the command line.
//!
//! Configuration comes from CLI arguments and an optional TOML file. The
//! event log is printed to stdout, one line per event, once the run ends.

use timed_echo::config::AppConfig;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = AppConfig::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let server = &config.server;
    info!(
        host = %server.host,
        port = server.port,
        buffer_size = server.buffer_size,
        run_duration = server.run_duration,
        max_connections = server.max_connections,
        "Starting timed-echo server"
    );

    match timed_echo::run(config.server) {
        Ok(log) => {
            for line in log {
                println!("{line}");
            }
            Ok(())
        }
        Err(e) => {
            if let Some(log) = e.log() {
                for line in log.lines() {
                    println!("{line}");
                }
            }
            error!(error = %e, "Server failed");
            Err(e.into())
        }
    }
}
