//! Per-connection persisted state.
//!
//! Every connection, upstream or client, owns one [`ConnectionState`]: a
//! lazily-loaded attribute bag backed by the redb [`StateStore`]. State is
//! saved explicitly at lifecycle transitions (disconnect, reconnect
//! attempt, registration reset), never implicitly.

mod store;

pub use store::StateStore;

use crate::registry::ConnId;
use redb::{CommitError, StorageError, TableError, TransactionError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use slbnc_proto::Message;
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;

/// Errors from state persistence.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("table error: {0}")]
    Table(#[from] TableError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("transaction error: {0}")]
    Transaction(#[from] TransactionError),

    #[error("commit error: {0}")]
    Commit(#[from] CommitError),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Whether a connection faces the network or a local client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnType {
    Outgoing,
    Incoming,
}

/// SASL credentials for an upstream session. The password is held decrypted
/// in memory; at-rest encryption belongs to the network record
/// (`db::Network`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaslCredentials {
    pub account: String,
    pub password: String,
}

/// State of one channel or query buffer on an upstream network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IrcBuffer {
    pub name: String,
    pub joined: bool,
    #[serde(default)]
    pub topic: Option<String>,
}

impl IrcBuffer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            joined: false,
            topic: None,
        }
    }
}

/// The serialized form of a connection's state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredConnection {
    pub con_id: String,
    pub con_type: ConnType,
    pub host: Option<String>,
    pub port: Option<u16>,
    #[serde(default)]
    pub tls: bool,
    pub bind_host: Option<String>,
    #[serde(default)]
    pub nick: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub realname: String,
    pub password: Option<String>,
    pub sasl: Option<SaslCredentials>,
    #[serde(default)]
    pub connected: bool,
    #[serde(default)]
    pub net_registered: bool,
    #[serde(default)]
    pub received_motd: bool,
    #[serde(default)]
    pub isupports: Vec<String>,
    #[serde(default)]
    pub registration_lines: Vec<Message>,
    #[serde(default)]
    pub buffers: BTreeMap<String, IrcBuffer>,
    #[serde(default)]
    pub linked_incoming_con_ids: HashSet<ConnId>,
    #[serde(default)]
    pub temp: HashMap<String, serde_json::Value>,
}

impl StoredConnection {
    /// An empty record for a fresh connection.
    pub fn empty(con_id: String, con_type: ConnType) -> Self {
        Self {
            con_id,
            con_type,
            host: None,
            port: None,
            tls: false,
            bind_host: None,
            nick: String::new(),
            username: String::new(),
            realname: String::new(),
            password: None,
            sasl: None,
            connected: false,
            net_registered: false,
            received_motd: false,
            isupports: Vec::new(),
            registration_lines: Vec::new(),
            buffers: BTreeMap::new(),
            linked_incoming_con_ids: HashSet::new(),
            temp: HashMap::new(),
        }
    }
}

/// Live state of one connection.
pub struct ConnectionState {
    con_id: ConnId,
    store: StateStore,
    loaded: bool,

    pub con_type: ConnType,

    // Network settings
    pub host: Option<String>,
    pub port: Option<u16>,
    pub tls: bool,
    pub bind_host: Option<String>,
    pub nick: String,
    pub username: String,
    pub realname: String,
    pub password: Option<String>,
    pub sasl: Option<SaslCredentials>,

    // Registration runtime state
    pub connected: bool,
    pub net_registered: bool,
    pub received_motd: bool,
    pub isupports: Vec<String>,
    pub registration_lines: Vec<Message>,

    pub buffers: BTreeMap<String, IrcBuffer>,
    pub linked_incoming_con_ids: HashSet<ConnId>,

    // Scratch space that rides along with the durable record
    temp: HashMap<String, serde_json::Value>,
}

impl ConnectionState {
    pub fn new(con_id: ConnId, con_type: ConnType, store: StateStore) -> Self {
        Self {
            con_id,
            store,
            loaded: false,
            con_type,
            host: None,
            port: None,
            tls: false,
            bind_host: None,
            nick: String::new(),
            username: String::new(),
            realname: String::new(),
            password: None,
            sasl: None,
            connected: false,
            net_registered: false,
            received_motd: false,
            isupports: Vec::new(),
            registration_lines: Vec::new(),
            buffers: BTreeMap::new(),
            linked_incoming_con_ids: HashSet::new(),
            temp: HashMap::new(),
        }
    }

    pub fn con_id(&self) -> &ConnId {
        &self.con_id
    }

    /// Load the full record if it has not been loaded yet. Idempotent and
    /// safe to call on every inbound message; a missing record leaves the
    /// fresh defaults in place.
    pub async fn maybe_load(&mut self) -> Result<(), StateError> {
        if self.loaded {
            return Ok(());
        }

        if let Some(record) = self.store.load(self.con_id.as_str())? {
            self.apply_record(record);
        }
        self.loaded = true;
        Ok(())
    }

    /// (Re)load network settings from the store. On first call this also
    /// loads the runtime state; later calls only refresh the network
    /// settings so in-flight runtime state is not clobbered.
    pub async fn load_connection_info(&mut self) -> Result<(), StateError> {
        if !self.loaded {
            return self.maybe_load().await;
        }

        if let Some(record) = self.store.load(self.con_id.as_str())? {
            self.apply_network_settings(record);
        }
        Ok(())
    }

    /// Persist the whole record, all-or-nothing.
    pub async fn save(&self) -> Result<(), StateError> {
        self.store.save(&self.to_record())
    }

    /// Delete the backing record.
    pub async fn destroy(&mut self) -> Result<(), StateError> {
        self.store.delete(self.con_id.as_str())?;
        self.loaded = false;
        Ok(())
    }

    /// Read a value from the ephemeral store.
    pub fn temp_get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.temp
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// Write (or with `None` remove) a value in the ephemeral store. The
    /// ephemeral store persists through the same save path as everything
    /// else, so this saves the record.
    pub async fn temp_set<T: Serialize>(
        &mut self,
        key: &str,
        value: Option<T>,
    ) -> Result<(), StateError> {
        match value {
            Some(value) => {
                let value = serde_json::to_value(value)
                    .map_err(|e| StateError::Serialization(e.to_string()))?;
                self.temp.insert(key.to_string(), value);
            }
            None => {
                self.temp.remove(key);
            }
        }
        self.save().await
    }

    /// Get a buffer by name, creating it if needed.
    pub fn get_or_add_buffer(&mut self, name: &str) -> &mut IrcBuffer {
        self.buffers
            .entry(name.to_string())
            .or_insert_with(|| IrcBuffer::new(name))
    }

    /// Value of an `NAME=value` ISUPPORT token, if the server advertised one.
    pub fn isupport_token(&self, name: &str) -> Option<String> {
        let prefix = format!("{name}=");
        self.isupports
            .iter()
            .find(|token| token.starts_with(&prefix))
            .map(|token| token[prefix.len()..].to_string())
    }

    /// Whether a name is a channel name, per the server's CHANTYPES.
    /// Defaults to `#&` when the server has not advertised any.
    pub fn is_channel_name(&self, name: &str) -> bool {
        let types = self
            .isupport_token("CHANTYPES")
            .unwrap_or_else(|| "#&".to_string());
        name.chars().next().is_some_and(|c| types.contains(c))
    }

    fn to_record(&self) -> StoredConnection {
        StoredConnection {
            con_id: self.con_id.as_str().to_string(),
            con_type: self.con_type,
            host: self.host.clone(),
            port: self.port,
            tls: self.tls,
            bind_host: self.bind_host.clone(),
            nick: self.nick.clone(),
            username: self.username.clone(),
            realname: self.realname.clone(),
            password: self.password.clone(),
            sasl: self.sasl.clone(),
            connected: self.connected,
            net_registered: self.net_registered,
            received_motd: self.received_motd,
            isupports: self.isupports.clone(),
            registration_lines: self.registration_lines.clone(),
            buffers: self.buffers.clone(),
            linked_incoming_con_ids: self.linked_incoming_con_ids.clone(),
            temp: self.temp.clone(),
        }
    }

    fn apply_record(&mut self, record: StoredConnection) {
        self.con_type = record.con_type;
        self.connected = record.connected;
        self.net_registered = record.net_registered;
        self.received_motd = record.received_motd;
        self.isupports = record.isupports.clone();
        self.registration_lines = record.registration_lines.clone();
        self.buffers = record.buffers.clone();
        self.linked_incoming_con_ids = record.linked_incoming_con_ids.clone();
        self.temp = record.temp.clone();
        self.apply_network_settings(record);
    }

    fn apply_network_settings(&mut self, record: StoredConnection) {
        self.host = record.host;
        self.port = record.port;
        self.tls = record.tls;
        self.bind_host = record.bind_host;
        self.nick = record.nick;
        self.username = record.username;
        self.realname = record.realname;
        self.password = record.password;
        self.sasl = record.sasl;
    }
}
