//! Readiness multiplexer and I/O dispatcher.
//!
//! Readiness-based model: poll tells us which sockets are ready, then we
//! perform non-blocking accept/read/write syscalls on them.
//!
//! Each read takes at most `buffer_size` bytes and the same bytes are written
//! straight back. If the socket will not take the whole echo, the tail is
//! parked in the connection's pending buffer, WRITABLE interest is added, and
//! reads on that connection pause until the tail is flushed.
//!
//! ## Fairness
//!
//! mio readiness is edge-triggered, so a socket that still has data after
//! being serviced will not be reported again. A single ready handle gets at
//! most `READS_PER_EVENT` reads (or `ACCEPTS_PER_EVENT` accepts) per
//! iteration; if it hits that budget it is carried into the next iteration,
//! which polls with a zero timeout so the carried handles and any newly
//! ready ones are serviced side by side.

use crate::config::ServerConfig;
use crate::deadline::DeadlineClock;
use crate::event_log::{Event, EventLog};
use crate::listener::Listener;
use crate::registry::{ConnectionRegistry, OpenConnection};
use bytes::Buf;
use mio::{Events, Interest, Poll, Token};
use std::io::{self, Read, Write};
use std::time::Duration;
use tracing::{debug, trace, warn};

pub(crate) const LISTENER_TOKEN: Token = Token(usize::MAX);

const EVENTS_CAPACITY: usize = 1024;

/// Reads of up to `buffer_size` bytes one client gets per iteration.
const READS_PER_EVENT: usize = 16;

/// Accepts the listener gets per iteration.
const ACCEPTS_PER_EVENT: usize = 64;

/// What a readiness token refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handle {
    Listener,
    Client(usize),
}

impl From<Token> for Handle {
    fn from(token: Token) -> Self {
        match token {
            LISTENER_TOKEN => Handle::Listener,
            Token(id) => Handle::Client(id),
        }
    }
}

/// State of a client after its ready I/O has been serviced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientStatus {
    /// Drained to `WouldBlock`, or waiting for WRITABLE to flush an echo.
    Open,
    /// Read budget spent with data possibly still queued.
    Busy,
    PeerClosed,
}

/// Poll and dispatch until the deadline passes.
///
/// Returns an error only if the poll call itself fails; per-connection
/// failures are logged and the connection is torn down.
pub fn run(
    poll: &mut Poll,
    listener: &Listener,
    registry: &mut ConnectionRegistry,
    log: &mut EventLog,
    clock: &DeadlineClock,
    config: &ServerConfig,
) -> io::Result<()> {
    let mut events = Events::with_capacity(EVENTS_CAPACITY);
    let mut buffer = vec![0u8; config.buffer_size];
    let mut carried: Vec<Handle> = Vec::new();
    let mut ready: Vec<Handle> = Vec::new();

    while !clock.expired() {
        let timeout = if carried.is_empty() {
            clock.poll_timeout(config.poll_quantum)
        } else {
            Duration::ZERO
        };
        match poll.poll(&mut events, Some(timeout)) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }

        ready.clear();
        ready.append(&mut carried);
        for event in events.iter() {
            let handle = Handle::from(event.token());
            if !ready.contains(&handle) {
                ready.push(handle);
            }
        }

        for &handle in &ready {
            let more = match handle {
                Handle::Listener => accept_connections(listener, poll, registry, log),
                Handle::Client(conn_id) => {
                    dispatch_client(conn_id, poll, registry, &mut buffer, log)
                }
            };
            if more {
                carried.push(handle);
            }
        }
    }

    Ok(())
}

/// Accept pending connections. Returns true if the budget ran out before
/// the backlog was drained.
fn accept_connections(
    listener: &Listener,
    poll: &Poll,
    registry: &mut ConnectionRegistry,
    log: &mut EventLog,
) -> bool {
    for _ in 0..ACCEPTS_PER_EVENT {
        match listener.accept() {
            Ok((stream, peer)) => {
                let conn_id = match registry.insert(OpenConnection::new(stream, peer)) {
                    Ok(conn_id) => conn_id,
                    Err(_rejected) => {
                        warn!(peer = %peer, "Connection limit reached");
                        log.record(Event::Rejected { peer });
                        continue;
                    }
                };

                debug!(conn_id, peer = %peer, "Accepted connection");
                log.record(Event::Accepted { peer });

                let registered = match registry.get_mut(conn_id) {
                    Some(conn) => {
                        poll.registry()
                            .register(&mut conn.stream, Token(conn_id), Interest::READABLE)
                    }
                    None => continue,
                };
                if let Err(e) = registered {
                    teardown(conn_id, poll, registry, log, Some(e));
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return false,
            Err(ref e) if is_per_connection(e) => {
                debug!(error = %e, "Pending connection failed before accept");
            }
            Err(e) => {
                warn!(error = %e, "Accept error");
                return false;
            }
        }
    }
    true
}

/// Accept errors that concern one queued connection, not the listener.
fn is_per_connection(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::Interrupted
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
}

/// Service one ready client. Returns true if it should be carried into the
/// next iteration.
fn dispatch_client(
    conn_id: usize,
    poll: &Poll,
    registry: &mut ConnectionRegistry,
    buffer: &mut [u8],
    log: &mut EventLog,
) -> bool {
    let status = match registry.get_mut(conn_id) {
        Some(conn) => service_client(conn_id, conn, poll, buffer),
        // Already torn down earlier in this batch.
        None => return false,
    };

    match status {
        Ok(ClientStatus::Open) => false,
        Ok(ClientStatus::Busy) => true,
        Ok(ClientStatus::PeerClosed) => {
            teardown(conn_id, poll, registry, log, None);
            false
        }
        Err(e) => {
            teardown(conn_id, poll, registry, log, Some(e));
            false
        }
    }
}

/// Flush any parked echo bytes, then read and echo until the socket drains
/// or the read budget is spent.
fn service_client(
    conn_id: usize,
    conn: &mut OpenConnection,
    poll: &Poll,
    buffer: &mut [u8],
) -> io::Result<ClientStatus> {
    if conn.has_pending() {
        flush_pending(conn)?;
        if conn.has_pending() {
            return Ok(ClientStatus::Open);
        }
        poll.registry()
            .reregister(&mut conn.stream, Token(conn_id), Interest::READABLE)?;
    }

    let mut reads = 0;
    while reads < READS_PER_EVENT {
        let n = match conn.stream.read(buffer) {
            Ok(0) => return Ok(ClientStatus::PeerClosed),
            Ok(n) => n,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(ClientStatus::Open),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        reads += 1;

        trace!(conn_id, bytes = n, "Echoing");
        echo(conn, &buffer[..n])?;

        if conn.has_pending() {
            poll.registry().reregister(
                &mut conn.stream,
                Token(conn_id),
                Interest::READABLE | Interest::WRITABLE,
            )?;
            return Ok(ClientStatus::Open);
        }
    }

    Ok(ClientStatus::Busy)
}

/// Write `data` back, parking whatever the socket will not take yet.
fn echo(conn: &mut OpenConnection, data: &[u8]) -> io::Result<()> {
    let mut written = 0;
    while written < data.len() {
        match conn.stream.write(&data[written..]) {
            Ok(0) => return Err(write_zero()),
            Ok(n) => written += n,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    if written < data.len() {
        conn.pending.extend_from_slice(&data[written..]);
    }
    Ok(())
}

fn flush_pending(conn: &mut OpenConnection) -> io::Result<()> {
    while conn.has_pending() {
        match conn.stream.write(&conn.pending) {
            Ok(0) => return Err(write_zero()),
            Ok(n) => conn.pending.advance(n),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn write_zero() -> io::Error {
    io::Error::new(io::ErrorKind::WriteZero, "write returned 0")
}

/// Remove a client from the registry and close it.
fn teardown(
    conn_id: usize,
    poll: &Poll,
    registry: &mut ConnectionRegistry,
    log: &mut EventLog,
    error: Option<io::Error>,
) {
    if let Some(mut conn) = registry.remove(conn_id) {
        if let Err(e) = poll.registry().deregister(&mut conn.stream) {
            trace!(conn_id, error = %e, "Deregister failed");
        }
        let peer = conn.peer;
        drop(conn);

        match error {
            None => {
                debug!(conn_id, peer = %peer, "Connection closed by peer");
                log.record(Event::Closed { peer });
            }
            Some(e) => {
                debug!(conn_id, peer = %peer, error = %e, "Connection error");
                log.record(Event::Dropped { peer, error: &e });
            }
        }
    }
}
