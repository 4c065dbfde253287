//! Shutdown sequencing.
//!
//! Clients are closed first, each independently, and the listener last.
//! A failure to close one client is logged and the rest are still closed.

use crate::event_log::{Event, EventLog};
use crate::listener::Listener;
use crate::registry::{ConnectionRegistry, OpenConnection};
use mio::Poll;
use std::io;
use std::net::Shutdown;
use tracing::{info, warn};

/// Close every connection and the listener, then record the run summary.
pub fn shutdown(
    poll: &Poll,
    listener: &mut Listener,
    registry: &mut ConnectionRegistry,
    log: &mut EventLog,
    run_duration: u64,
) {
    let open = registry.len();

    for (conn_id, mut conn) in registry.drain() {
        let peer = conn.peer;
        match close_connection(poll, &mut conn) {
            Ok(()) => log.record(Event::Closed { peer }),
            Err(e) => {
                warn!(conn_id, peer = %peer, error = %e, "Failed to close connection");
                log.record(Event::CloseFailed { peer, error: &e });
            }
        }
    }

    if let Ok(source) = listener.source_mut() {
        let _ = poll.registry().deregister(source);
    }
    listener.stop();

    info!(closed = open, run_duration, "Server shut down");
    log.record(Event::RanFor {
        seconds: run_duration,
    });
}

/// Deregister and shut down both directions. The socket itself is released
/// when `conn` is dropped, whether or not this succeeds.
fn close_connection(poll: &Poll, conn: &mut OpenConnection) -> io::Result<()> {
    let deregistered = poll.registry().deregister(&mut conn.stream);
    let shut = match conn.stream.shutdown(Shutdown::Both) {
        Err(ref e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
        other => other,
    };
    deregistered.and(shut)
}
