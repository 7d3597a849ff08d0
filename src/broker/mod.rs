//! Message broker boundary between the socket and protocol worker roles.
//!
//! This process never touches a socket. Everything network-shaped is a
//! published event: the protocol worker asks socket workers to open, feed
//! and close connections, and consumes the socket-side notifications in
//! return. Only the contract lives here; the in-process transport in
//! [`memory`] covers single-process deployments and the test suite.
//!
//! Events for one connection id are delivered in publish order. Publishing
//! is fire-and-forget: a failed publish is a transport fault that callers
//! log and survive.

mod memory;

pub use memory::{MemoryBroker, SocketSide};

use crate::registry::ConnId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broker errors.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker channel closed")]
    Closed,
}

/// A request for a socket worker to establish an upstream connection.
///
/// Hooks observing `connection_to_open` may rewrite any of these fields
/// before the request is published; host and port may still be absent at
/// emission time and the request is only published once both are present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenRequest {
    pub id: ConnId,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub tls: bool,
    #[serde(rename = "bindAddress")]
    pub bind_address: String,
    /// Force a specific TLS servername (SNI) instead of the host.
    pub servername: Option<String>,
}

/// Commands published by the protocol worker, consumed by socket workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SocketCommand {
    #[serde(rename = "connection.open")]
    Open(OpenRequest),
    #[serde(rename = "connection.data")]
    Data { id: ConnId, data: String },
    #[serde(rename = "connection.close")]
    Close { id: ConnId },
}

/// Events published by socket workers, consumed by the protocol worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SocketEvent {
    #[serde(rename = "connection.connected")]
    Connected { id: ConnId },
    #[serde(rename = "connection.data")]
    Data { id: ConnId, line: String },
    #[serde(rename = "connection.closed")]
    Closed { id: ConnId, error: Option<String> },
}

/// Publish half of the broker as seen by the protocol worker.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish a command to the socket-worker queue.
    async fn send_to_sockets(&self, command: SocketCommand) -> Result<(), BrokerError>;
}
