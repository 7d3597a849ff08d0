//! The client connection seam.
//!
//! The upstream orchestrator only ever talks to clients through
//! [`ClientLink`]; any connection object implementing it can attach to an
//! upstream session. [`ConnectionIncoming`] is the bouncer's own client
//! connection type - like the upstream side it owns no socket and writes
//! through the broker.

use super::ConnectionOutgoing;
use crate::broker::{Broker, BrokerError, SocketCommand};
use crate::registry::{ConnId, ConnectionRegistry};
use async_trait::async_trait;
use parking_lot::Mutex;
use slbnc_proto::{Message, Prefix};
use std::sync::Arc;

/// The contract an upstream session relies on from an attached client.
#[async_trait]
pub trait ClientLink: Send + Sync {
    /// The client's connection id.
    fn con_id(&self) -> &ConnId;

    /// The client's current nick.
    fn nick(&self) -> String;

    /// Whether the client has completed its local IRC registration.
    fn net_registered(&self) -> bool;

    /// Relay a message to the client as-is.
    async fn write_msg(&self, message: &Message) -> Result<(), BrokerError>;

    /// Write a line to the client from a given nick.
    async fn write_msg_from(
        &self,
        from_nick: &str,
        command: &str,
        params: &[&str],
    ) -> Result<(), BrokerError>;

    /// Write a bouncer status line to the client.
    async fn write_status(&self, text: &str) -> Result<(), BrokerError>;

    /// Bring an unregistered client to an interactive state without an
    /// upstream network behind it.
    async fn register_local_client(&self) -> Result<(), BrokerError>;
}

#[derive(Default)]
struct ClientState {
    nick: String,
    net_registered: bool,
    upstream_id: Option<ConnId>,
}

/// A local client session attached to one upstream.
pub struct ConnectionIncoming {
    id: ConnId,
    broker: Arc<dyn Broker>,
    registry: Arc<ConnectionRegistry>,
    status_nick: String,
    state: Mutex<ClientState>,
}

impl ConnectionIncoming {
    /// Create a client connection and register it.
    pub fn new(
        id: Option<ConnId>,
        broker: Arc<dyn Broker>,
        registry: Arc<ConnectionRegistry>,
        status_nick: impl Into<String>,
    ) -> Arc<Self> {
        let con = Arc::new(Self {
            id: id.unwrap_or_default(),
            broker,
            registry: Arc::clone(&registry),
            status_nick: status_nick.into(),
            state: Mutex::new(ClientState::default()),
        });

        registry.insert_incoming(con.clone());
        con
    }

    pub fn set_nick(&self, nick: impl Into<String>) {
        self.state.lock().nick = nick.into();
    }

    pub fn set_net_registered(&self, registered: bool) {
        self.state.lock().net_registered = registered;
    }

    /// Attach this client to an upstream session (both directions).
    pub async fn link_upstream(
        &self,
        upstream: &Arc<ConnectionOutgoing>,
    ) -> Result<(), super::ConnectionError> {
        self.state.lock().upstream_id = Some(upstream.id().clone());
        upstream.link_client(self.id.clone()).await
    }

    /// Resolve the attached upstream, if it is still alive.
    pub fn upstream(&self) -> Option<Arc<ConnectionOutgoing>> {
        let upstream_id = self.state.lock().upstream_id.clone()?;
        self.registry.outgoing(&upstream_id)
    }

    /// Unregister this client; the upstream's link set is cleaned up by the
    /// owner of the detach.
    pub fn destroy(&self) {
        self.registry.remove(&self.id);
    }
}

#[async_trait]
impl ClientLink for ConnectionIncoming {
    fn con_id(&self) -> &ConnId {
        &self.id
    }

    fn nick(&self) -> String {
        self.state.lock().nick.clone()
    }

    fn net_registered(&self) -> bool {
        self.state.lock().net_registered
    }

    async fn write_msg(&self, message: &Message) -> Result<(), BrokerError> {
        self.broker
            .send_to_sockets(SocketCommand::Data {
                id: self.id.clone(),
                data: message.to_string(),
            })
            .await
    }

    async fn write_msg_from(
        &self,
        from_nick: &str,
        command: &str,
        params: &[&str],
    ) -> Result<(), BrokerError> {
        let message = Message::with_prefix(
            Prefix::parse(from_nick),
            command,
            params.iter().map(|p| p.to_string()).collect(),
        );
        self.write_msg(&message).await
    }

    async fn write_status(&self, text: &str) -> Result<(), BrokerError> {
        let nick = self.nick();
        let status_nick = self.status_nick.clone();
        self.write_msg_from(&status_nick, "PRIVMSG", &[&nick, text])
            .await
    }

    async fn register_local_client(&self) -> Result<(), BrokerError> {
        {
            let mut state = self.state.lock();
            if state.net_registered {
                return Ok(());
            }
            state.net_registered = true;
        }
        let nick = self.nick();

        // Replay the upstream's buffered registration burst when there is
        // one; the stored lines carry the upstream's nick in their first
        // parameter, which gets rewritten to this client's.
        if let Some(upstream) = self.upstream() {
            let lines = upstream.state().await.registration_lines.clone();
            if !lines.is_empty() {
                for line in &lines {
                    let mut message = line.clone();
                    if !message.params.is_empty() {
                        message.params[0] = nick.clone();
                    }
                    self.write_msg(&message).await?;
                }
                return Ok(());
            }
        }

        // No upstream burst yet - greet from the bouncer itself
        let welcome = Message::with_prefix(
            Prefix::parse(&self.status_nick),
            "001",
            vec![nick, "Welcome to your bouncer".to_string()],
        );
        self.write_msg(&welcome).await
    }
}
