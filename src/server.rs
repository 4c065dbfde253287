//! Server lifecycle: bind, run until the deadline, shut down.

use crate::config::ServerConfig;
use crate::deadline::DeadlineClock;
use crate::error::{Result, ServerError};
use crate::event_log::{Event, EventLog};
use crate::event_loop::{self, LISTENER_TOKEN};
use crate::listener::Listener;
use crate::registry::ConnectionRegistry;
use crate::shutdown;
use mio::{Interest, Poll};
use std::io;
use std::net::SocketAddr;
use tracing::{error, info};

/// A bound, not yet running, echo server.
pub struct Server {
    config: ServerConfig,
    poll: Poll,
    listener: Listener,
    registry: ConnectionRegistry,
    log: EventLog,
}

impl Server {
    /// Validate `config`, bind the listener and register it for readiness.
    ///
    /// Nothing is logged if validation or binding fails.
    pub fn bind(config: ServerConfig) -> Result<Self> {
        config.validate()?;

        let poll = Poll::new().map_err(|source| ServerError::Multiplexer {
            source,
            log: EventLog::new(),
        })?;

        let mut log = EventLog::new();
        let listener = Listener::start(&config.host, config.port, &mut log)?;
        let registry = ConnectionRegistry::new(config.max_connections);

        let mut server = Server {
            config,
            poll,
            listener,
            registry,
            log,
        };

        match server.register_listener() {
            Ok(()) => Ok(server),
            Err(source) => Err(server.abort(source)),
        }
    }

    /// Address the listener actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Serve until the run duration elapses and return the event log.
    pub fn run(mut self) -> Result<EventLog> {
        let clock = DeadlineClock::start(self.config.run_duration());

        info!(
            addr = %self.listener.local_addr(),
            buffer_size = self.config.buffer_size,
            run_duration = self.config.run_duration,
            max_connections = self.config.max_connections,
            "Event loop started"
        );

        let result = event_loop::run(
            &mut self.poll,
            &self.listener,
            &mut self.registry,
            &mut self.log,
            &clock,
            &self.config,
        );

        match result {
            Ok(()) => {
                self.close();
                Ok(self.log)
            }
            Err(source) => Err(self.abort(source)),
        }
    }

    fn register_listener(&mut self) -> io::Result<()> {
        let source = self.listener.source_mut()?;
        self.poll
            .registry()
            .register(source, LISTENER_TOKEN, Interest::READABLE)
    }

    fn close(&mut self) {
        shutdown::shutdown(
            &self.poll,
            &mut self.listener,
            &mut self.registry,
            &mut self.log,
            self.config.run_duration,
        );
    }

    /// Fatal multiplexer failure: clean up, then hand back the error with
    /// everything logged so far.
    fn abort(mut self, source: io::Error) -> ServerError {
        error!(error = %source, "Event loop failed");
        self.log.record(Event::PollFailed { error: &source });
        self.close();
        ServerError::Multiplexer {
            source,
            log: std::mem::take(&mut self.log),
        }
    }
}

/// Bind and run a server described by `config`.
pub fn run(config: ServerConfig) -> Result<EventLog> {
    Server::bind(config)?.run()
}

/// Run an echo server on `host:port` for `run_duration` seconds, reading at
/// most `buffer_size` bytes at a time, and return the event log lines.
pub fn start(host: &str, port: u16, buffer_size: usize, run_duration: u64) -> Result<Vec<String>> {
    run(ServerConfig::new(host, port, buffer_size, run_duration)).map(EventLog::into_lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use std::io::{Read, Write};
    use std::net::{Shutdown, TcpStream};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    fn spawn(config: ServerConfig) -> (SocketAddr, thread::JoinHandle<Result<EventLog>>) {
        let server = Server::bind(config).unwrap();
        let addr = server.local_addr();
        (addr, thread::spawn(move || server.run()))
    }

    fn connect(addr: SocketAddr) -> TcpStream {
        let stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        stream
    }

    #[test]
    fn test_no_clients_fixed_port() {
        let started = Instant::now();
        let log = start("127.0.0.1", 54321, 1024, 1).unwrap();
        let elapsed = started.elapsed();

        assert_eq!(
            log,
            vec!["Server started on 127.0.0.1:54321.", "Ran for 1 seconds."]
        );
        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed < Duration::from_millis(1500), "took {elapsed:?}");
    }

    #[test]
    fn test_zero_duration() {
        for buffer_size in [1, 4096] {
            let started = Instant::now();
            let log = start("127.0.0.1", 0, buffer_size, 0).unwrap();
            assert_eq!(log, vec!["Server started on 127.0.0.1:0.", "Ran for 0 seconds."]);
            assert!(started.elapsed() < Duration::from_millis(500));
        }
    }

    #[test]
    fn test_invalid_buffer_size() {
        let err = start("127.0.0.1", 0, 0, 1).unwrap_err();
        assert!(matches!(
            err,
            ServerError::Config(ConfigError::InvalidBufferSize(0))
        ));
        assert!(err.log().is_none());
    }

    #[test]
    fn test_bind_error_produces_no_log() {
        let holder = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = holder.local_addr().unwrap().port();

        let err = start("127.0.0.1", port, 16, 1).unwrap_err();
        assert!(matches!(err, ServerError::Bind { .. }));
        assert!(err.log().is_none());
    }

    #[test]
    fn test_ping_round_trip() {
        let (addr, handle) = spawn(ServerConfig::new("127.0.0.1", 0, 1024, 1));

        let mut client = connect(addr);
        let client_addr = client.local_addr().unwrap();
        client.write_all(b"ping").unwrap();
        let mut reply = [0u8; 4];
        client.read_exact(&mut reply).unwrap();
        assert_eq!(&reply, b"ping");
        drop(client);

        let log = handle.join().unwrap().unwrap().into_lines();
        assert_eq!(
            log,
            vec![
                "Server started on 127.0.0.1:0.".to_string(),
                format!("Accepted connection from {client_addr}."),
                format!("Closed connection from {client_addr}."),
                "Ran for 1 seconds.".to_string(),
            ]
        );
    }

    #[test]
    fn test_payload_larger_than_buffer() {
        let (addr, handle) = spawn(ServerConfig::new("127.0.0.1", 0, 16, 2));

        let payload: Vec<u8> = (0..256 * 1024).map(|i| (i % 251) as u8).collect();
        let client = connect(addr);
        let mut writer = client.try_clone().unwrap();
        let to_send = payload.clone();
        let sender = thread::spawn(move || writer.write_all(&to_send).unwrap());

        let mut reader = client;
        let mut echoed = vec![0u8; payload.len()];
        reader.read_exact(&mut echoed).unwrap();
        sender.join().unwrap();
        assert!(echoed == payload);
        drop(reader);

        let log = handle.join().unwrap().unwrap();
        assert_eq!(log.lines().last().unwrap(), "Ran for 2 seconds.");
    }

    #[test]
    fn test_concurrent_clients() {
        let (addr, handle) = spawn(ServerConfig::new("127.0.0.1", 0, 64, 2));

        let mut clients: Vec<TcpStream> = (0..4).map(|_| connect(addr)).collect();
        for (i, client) in clients.iter_mut().enumerate() {
            client.write_all(format!("client-{i}").as_bytes()).unwrap();
        }
        for (i, client) in clients.iter_mut().enumerate() {
            let expected = format!("client-{i}");
            let mut reply = vec![0u8; expected.len()];
            client.read_exact(&mut reply).unwrap();
            assert_eq!(reply, expected.as_bytes());
        }
        drop(clients);

        let log = handle.join().unwrap().unwrap();
        let lines = log.lines();
        assert_eq!(lines.first().unwrap(), "Server started on 127.0.0.1:0.");
        assert_eq!(lines.last().unwrap(), "Ran for 2 seconds.");
        assert_eq!(
            lines.iter().filter(|l| l.starts_with("Accepted connection")).count(),
            4
        );
        assert_eq!(
            lines.iter().filter(|l| l.starts_with("Closed connection")).count(),
            4
        );
    }

    fn round_trip(client: &mut TcpStream, payload: &[u8]) {
        client.write_all(payload).unwrap();
        let mut reply = vec![0u8; payload.len()];
        client.read_exact(&mut reply).unwrap();
        assert_eq!(reply, payload);
    }

    #[test]
    fn test_streaming_client_does_not_starve_others() {
        let (addr, handle) = spawn(ServerConfig::new("127.0.0.1", 0, 1024, 3));

        let streamer = connect(addr);
        let mut writer = streamer.try_clone().unwrap();
        let mut reader = streamer.try_clone().unwrap();
        let stop = Arc::new(AtomicBool::new(false));

        let stop_writer = Arc::clone(&stop);
        let write_loop = thread::spawn(move || {
            let chunk = vec![0x5au8; 64 * 1024];
            while !stop_writer.load(Ordering::Relaxed) {
                if writer.write_all(&chunk).is_err() {
                    break;
                }
            }
        });
        let read_loop = thread::spawn(move || {
            let mut buf = vec![0u8; 64 * 1024];
            while let Ok(n) = reader.read(&mut buf) {
                if n == 0 {
                    break;
                }
            }
        });

        thread::sleep(Duration::from_millis(300));

        let mut pinger = connect(addr);
        let sent = Instant::now();
        round_trip(&mut pinger, b"ping");
        let latency = sent.elapsed();
        assert!(latency < Duration::from_secs(1), "ping took {latency:?}");

        stop.store(true, Ordering::Relaxed);
        write_loop.join().unwrap();
        let _ = streamer.shutdown(Shutdown::Both);
        read_loop.join().unwrap();
        drop(pinger);

        let log = handle.join().unwrap().unwrap();
        assert_eq!(log.lines().last().unwrap(), "Ran for 3 seconds.");
    }

    #[test]
    fn test_reset_client_is_isolated() {
        let (addr, handle) = spawn(ServerConfig::new("127.0.0.1", 0, 64, 2));

        let mut doomed = connect(addr);
        let doomed_addr = doomed.local_addr().unwrap();
        round_trip(&mut doomed, b"first");

        let mut healthy = connect(addr);
        let healthy_addr = healthy.local_addr().unwrap();
        round_trip(&mut healthy, b"before");

        // Abortive close: the server sees a reset, not EOF.
        let socket = socket2::Socket::from(doomed);
        socket.set_linger(Some(Duration::ZERO)).unwrap();
        drop(socket);
        thread::sleep(Duration::from_millis(100));

        round_trip(&mut healthy, b"after");
        drop(healthy);

        let log = handle.join().unwrap().unwrap();
        let lines = log.lines();
        let dropped = format!("Dropped connection from {doomed_addr}: ");
        assert!(lines.iter().any(|l| l.starts_with(&dropped)), "{lines:?}");
        assert!(lines.contains(&format!("Closed connection from {healthy_addr}.")));
        assert_eq!(lines.last().unwrap(), "Ran for 2 seconds.");
    }

    #[test]
    fn test_open_clients_closed_at_expiry() {
        let (addr, handle) = spawn(ServerConfig::new("127.0.0.1", 0, 64, 1));

        let mut client = connect(addr);
        let client_addr = client.local_addr().unwrap();
        client.write_all(b"hold").unwrap();
        let mut reply = [0u8; 4];
        client.read_exact(&mut reply).unwrap();

        let log = handle.join().unwrap().unwrap().into_lines();
        assert_eq!(
            log[log.len() - 2..],
            [
                format!("Closed connection from {client_addr}."),
                "Ran for 1 seconds.".to_string(),
            ]
        );

        // The server's end is gone: EOF for the client, refusal for newcomers.
        let mut buf = [0u8; 4];
        assert_eq!(client.read(&mut buf).unwrap(), 0);
        assert!(TcpStream::connect(addr).is_err());
    }

    #[test]
    fn test_connection_limit() {
        let config = ServerConfig::new("127.0.0.1", 0, 64, 1).with_max_connections(1);
        let (addr, handle) = spawn(config);

        let mut first = connect(addr);
        first.write_all(b"one").unwrap();
        let mut reply = [0u8; 3];
        first.read_exact(&mut reply).unwrap();

        let mut second = connect(addr);
        let second_addr = second.local_addr().unwrap();
        let mut buf = [0u8; 4];
        assert!(matches!(second.read(&mut buf), Ok(0) | Err(_)));

        let log = handle.join().unwrap().unwrap();
        assert!(log.lines().contains(&format!(
            "Rejected connection from {second_addr}: connection limit reached."
        )));
    }

    #[test]
    fn test_abort_runs_shutdown_and_keeps_log() {
        let server = Server::bind(ServerConfig::new("127.0.0.1", 0, 64, 5)).unwrap();
        let addr = server.local_addr();

        let err = server.abort(io::Error::new(io::ErrorKind::Other, "poll exploded"));
        assert!(matches!(err, ServerError::Multiplexer { .. }));
        assert_eq!(
            err.log().unwrap().lines(),
            [
                "Server started on 127.0.0.1:0.",
                "Event loop failed: poll exploded.",
                "Ran for 5 seconds.",
            ]
        );
        assert!(TcpStream::connect(addr).is_err());
    }
}
