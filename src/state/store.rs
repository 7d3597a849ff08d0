//! Redb-backed persistence for connection state.
//!
//! One table, keyed by connection id, holding a serde_json
//! [`StoredConnection`] record. Saves are all-or-nothing per record.
//!
//! # Schema
//!
//! ```text
//! CONNECTIONS: con_id -> StoredConnection (serde_json)
//! ```

use super::{StateError, StoredConnection};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Redb table for per-connection state records.
const CONNECTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("connections");

/// Durable store for [`StoredConnection`] records.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) the store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StateError> {
        let db = Database::create(path)?;

        // Ensure the table exists
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(CONNECTIONS)?;
        }
        write_txn.commit()?;

        info!("Connection state store initialized");
        Ok(Self { db: Arc::new(db) })
    }

    /// Save a connection record, replacing any previous value.
    pub fn save(&self, record: &StoredConnection) -> Result<(), StateError> {
        let value = serde_json::to_vec(record)
            .map_err(|e| StateError::Serialization(e.to_string()))?;

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(CONNECTIONS)?;
            table.insert(record.con_id.as_str(), value.as_slice())?;
        }
        write_txn.commit()?;

        debug!(id = %record.con_id, "Saved connection state");
        Ok(())
    }

    /// Load one connection record.
    pub fn load(&self, con_id: &str) -> Result<Option<StoredConnection>, StateError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CONNECTIONS)?;

        let Some(value) = table.get(con_id)? else {
            return Ok(None);
        };

        let record = serde_json::from_slice(value.value())
            .map_err(|e| StateError::Serialization(e.to_string()))?;
        Ok(Some(record))
    }

    /// Load every stored record, skipping any that fail to deserialize.
    pub fn load_all(&self) -> Result<Vec<StoredConnection>, StateError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CONNECTIONS)?;

        let mut records = Vec::new();
        for item in table.iter()? {
            let (key, value) = item?;
            match serde_json::from_slice::<StoredConnection>(value.value()) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(id = %key.value(), error = %e, "Failed to deserialize connection record, skipping");
                }
            }
        }

        Ok(records)
    }

    /// Delete a connection record. Returns whether one was present.
    pub fn delete(&self, con_id: &str) -> Result<bool, StateError> {
        let write_txn = self.db.begin_write()?;
        let deleted = {
            let mut table = write_txn.open_table(CONNECTIONS)?;
            table.remove(con_id)?.is_some()
        };
        write_txn.commit()?;

        if deleted {
            debug!(id = %con_id, "Deleted connection state");
        }
        Ok(deleted)
    }
}
