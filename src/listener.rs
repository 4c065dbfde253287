//! Non-blocking TCP listening endpoint.

use crate::error::ServerError;
use crate::event_log::{Event, EventLog};
use mio::net::{TcpListener, TcpStream};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use tracing::info;

const LISTEN_BACKLOG: i32 = 1024;

/// Owns the listening socket until `stop` is called.
#[derive(Debug)]
pub struct Listener {
    inner: Option<TcpListener>,
    local_addr: SocketAddr,
}

impl Listener {
    /// Bind and listen on `host:port`, recording the start event on success.
    pub fn start(host: &str, port: u16, log: &mut EventLog) -> Result<Self, ServerError> {
        let bind_error = |source: io::Error| ServerError::Bind {
            addr: format!("{host}:{port}"),
            source,
        };

        let addr = resolve(host, port).map_err(bind_error)?;
        let listener = create_listener(addr).map_err(bind_error)?;
        let listener = TcpListener::from_std(listener);
        let local_addr = listener.local_addr().map_err(bind_error)?;

        info!(host, port, local = %local_addr, "Listening");
        log.record(Event::Started { host, port });

        Ok(Self {
            inner: Some(listener),
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    /// Accept one pending connection.
    pub fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        match &self.inner {
            Some(listener) => listener.accept(),
            None => Err(closed()),
        }
    }

    /// The mio source for poll registration.
    pub fn source_mut(&mut self) -> io::Result<&mut TcpListener> {
        self.inner.as_mut().ok_or_else(closed)
    }

    /// Release the socket. Safe to call more than once.
    pub fn stop(&mut self) {
        if let Some(listener) = self.inner.take() {
            drop(listener);
            info!(local = %self.local_addr, "Listener closed");
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.stop();
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "listener is closed")
}

fn resolve(host: &str, port: u16) -> io::Result<SocketAddr> {
    (host, port).to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("no address found for {host}"),
        )
    })
}

/// Create a non-blocking listening socket.
///
/// SO_REUSEADDR lets a restarted server rebind past TIME_WAIT; SO_REUSEPORT
/// is left off so a port held by another listener still fails to bind.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(socket.into())
}
