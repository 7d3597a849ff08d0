//! Connection identifiers and the shared connection registry.
//!
//! Upstream and client connections share one id namespace. The registry is
//! the sole owner of connection objects; everything else holds ids and
//! resolves them per use. A missed lookup means the connection is already
//! gone and is not an error.

use crate::connection::{ClientLink, ConnectionOutgoing};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Opaque unique connection identifier, stable across reconnects of the
/// same logical session.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnId(String);

impl ConnId {
    /// Generate a fresh identifier.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Wrap an existing identifier (e.g. one loaded from the state store).
    pub fn from_string(id: String) -> Self {
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A live connection object owned by the registry.
#[derive(Clone)]
pub enum ConnectionEntry {
    Outgoing(Arc<ConnectionOutgoing>),
    Incoming(Arc<dyn ClientLink>),
}

/// Arena of live connections, keyed by id.
#[derive(Default)]
pub struct ConnectionRegistry {
    cons: DashMap<ConnId, ConnectionEntry>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an upstream connection. Inserting under an id that is already
    /// live replaces the old entry; `ConnectionOutgoing::new` registers
    /// itself here so at most one instance per id is ever reachable.
    pub fn insert_outgoing(&self, con: Arc<ConnectionOutgoing>) {
        self.cons
            .insert(con.id().clone(), ConnectionEntry::Outgoing(con));
    }

    /// Insert a client connection.
    pub fn insert_incoming(&self, con: Arc<dyn ClientLink>) {
        self.cons
            .insert(con.con_id().clone(), ConnectionEntry::Incoming(con));
    }

    /// Resolve an id to an upstream connection.
    pub fn outgoing(&self, id: &ConnId) -> Option<Arc<ConnectionOutgoing>> {
        match self.cons.get(id).map(|entry| entry.value().clone()) {
            Some(ConnectionEntry::Outgoing(con)) => Some(con),
            _ => None,
        }
    }

    /// Resolve an id to a client connection.
    pub fn client(&self, id: &ConnId) -> Option<Arc<dyn ClientLink>> {
        match self.cons.get(id).map(|entry| entry.value().clone()) {
            Some(ConnectionEntry::Incoming(con)) => Some(con),
            _ => None,
        }
    }

    /// Remove a connection. Returns whether an entry was present.
    pub fn remove(&self, id: &ConnId) -> bool {
        self.cons.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.cons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cons.is_empty()
    }
}
