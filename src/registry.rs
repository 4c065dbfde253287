//! Registry of open client connections.
//!
//! Connections live in a slab so the id handed to mio as a `Token` is also
//! the lookup key. The listener is never stored here.

use bytes::BytesMut;
use mio::net::TcpStream;
use slab::Slab;
use std::net::SocketAddr;

/// A single accepted client connection.
#[derive(Debug)]
pub struct OpenConnection {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    /// Echo bytes the socket would not take yet.
    pub pending: BytesMut,
}

impl OpenConnection {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            pending: BytesMut::new(),
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// Bounded set of open connections with O(1) insert, lookup and remove.
#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: Slab<OpenConnection>,
    max_connections: usize,
}

impl ConnectionRegistry {
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Slab::new(),
            max_connections,
        }
    }

    /// Insert a connection, handing it back if the registry is full.
    pub fn insert(&mut self, conn: OpenConnection) -> Result<usize, OpenConnection> {
        if self.is_full() {
            return Err(conn);
        }
        Ok(self.connections.insert(conn))
    }

    pub fn get(&self, id: usize) -> Option<&OpenConnection> {
        self.connections.get(id)
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut OpenConnection> {
        self.connections.get_mut(id)
    }

    pub fn remove(&mut self, id: usize) -> Option<OpenConnection> {
        self.connections.try_remove(id)
    }

    pub fn contains(&self, id: usize) -> bool {
        self.connections.contains(id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.connections.len() >= self.max_connections
    }

    pub fn capacity(&self) -> usize {
        self.max_connections
    }

    /// Remove every connection, yielding ids in slab order.
    pub fn drain(&mut self) -> impl Iterator<Item = (usize, OpenConnection)> + '_ {
        let ids: Vec<usize> = self.connections.iter().map(|(id, _)| id).collect();
        ids.into_iter()
            .filter_map(move |id| self.connections.try_remove(id).map(|conn| (id, conn)))
    }
}
