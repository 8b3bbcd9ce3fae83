//! Render node registry
//!
//! In-memory table of every render node that currently holds a control
//! connection, keyed by [`ConnectionId`]. Iteration order is insertion order:
//! replacing an existing key keeps its slot, a new key is appended. The
//! selector depends on this order, so the table is an ordered list rather
//! than a hash map.
//!
//! The registry is empty on start and rebuilt purely from live connections.

pub mod entry;
pub mod selector;

pub use entry::{ConnectionId, RenderNodeEntry};
pub use selector::{AllocationSelector, REDIRECT_COOLDOWN_SECS};

use std::sync::Arc;

use tokio::sync::RwLock;

/// Registry shared between the control listener and the HTTP endpoints
pub type SharedRegistry = Arc<RwLock<RenderNodeRegistry>>;

/// Create an empty shared registry
pub fn new_shared_registry() -> SharedRegistry {
    Arc::new(RwLock::new(RenderNodeRegistry::new()))
}

/// Ordered table of render nodes keyed by control connection
#[derive(Debug, Default, Clone)]
pub struct RenderNodeRegistry {
    entries: Vec<(ConnectionId, RenderNodeEntry)>,
}

impl RenderNodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, conn: ConnectionId) -> Option<usize> {
        self.entries.iter().position(|(id, _)| *id == conn)
    }

    /// Insert or replace the entry for a connection.
    ///
    /// Returns the previous entry if the connection was already registered.
    pub fn upsert(&mut self, conn: ConnectionId, entry: RenderNodeEntry) -> Option<RenderNodeEntry> {
        match self.position(conn) {
            Some(idx) => Some(std::mem::replace(&mut self.entries[idx].1, entry)),
            None => {
                self.entries.push((conn, entry));
                None
            }
        }
    }

    pub fn get(&self, conn: ConnectionId) -> Option<&RenderNodeEntry> {
        self.entries
            .iter()
            .find(|(id, _)| *id == conn)
            .map(|(_, entry)| entry)
    }

    pub fn get_mut(&mut self, conn: ConnectionId) -> Option<&mut RenderNodeEntry> {
        self.entries
            .iter_mut()
            .find(|(id, _)| *id == conn)
            .map(|(_, entry)| entry)
    }

    /// Remove a connection's entry, keeping the order of the others
    pub fn remove(&mut self, conn: ConnectionId) -> Option<RenderNodeEntry> {
        let idx = self.position(conn)?;
        Some(self.entries.remove(idx).1)
    }

    /// Entries in insertion order
    pub fn values(&self) -> impl Iterator<Item = &RenderNodeEntry> {
        self.entries.iter().map(|(_, entry)| entry)
    }

    pub(crate) fn values_mut(&mut self) -> impl Iterator<Item = &mut RenderNodeEntry> {
        self.entries.iter_mut().map(|(_, entry)| entry)
    }

    /// `(connection, entry)` pairs in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (ConnectionId, &RenderNodeEntry)> {
        self.entries.iter().map(|(id, entry)| (*id, entry))
    }

    /// First entry registered for `address:port`
    pub fn find_by_address(&self, address: &str, port: u16) -> Option<(ConnectionId, &RenderNodeEntry)> {
        self.iter().find(|(_, entry)| entry.matches_address(address, port))
    }

    /// First entry registered for `address:port` under a connection other than `conn`
    pub fn find_by_address_excluding(
        &self,
        address: &str,
        port: u16,
        conn: ConnectionId,
    ) -> Option<(ConnectionId, &RenderNodeEntry)> {
        self.iter()
            .find(|(id, entry)| *id != conn && entry.matches_address(address, port))
    }

    /// Cloned `(connection, entry)` pairs for reporting
    pub fn snapshot(&self) -> Vec<(ConnectionId, RenderNodeEntry)> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, conn: ConnectionId) -> bool {
        self.position(conn).is_some()
    }
}
