//! The upstream session orchestrator.
//!
//! One `ConnectionOutgoing` per upstream IRC session. It never touches a
//! socket: opens, writes and closes are requests published to the socket
//! workers, and the socket-side notifications drive the lifecycle methods
//! here. All state mutation for a session happens on these methods, which
//! the worker invokes sequentially per connection id.

use super::{ClientLink, ConnectionError};
use crate::broker::{Broker, OpenRequest, SocketCommand};
use crate::commands::{Dispatch, Dispatcher, UpstreamContext};
use crate::hooks::{HookPayload, HookRegistry};
use crate::registry::{ConnId, ConnectionRegistry};
use crate::state::{ConnType, ConnectionState, StateStore};
use rand::Rng;
use slbnc_proto::Message;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, trace, warn};

/// Reconnect jitter range in milliseconds. Randomized so a restart does not
/// reconnect every session at the same instant.
const RECONNECT_JITTER_MS: std::ops::Range<u64> = 300..5000;

/// Serialize an IRC line from raw parameters.
///
/// If more than one parameter is given and the final parameter starts with
/// `:` or contains a space, it becomes a trailing parameter. The line is
/// CRLF-terminated.
pub fn format_line(params: &[&str]) -> String {
    let mut out = String::new();
    let last = params.len().saturating_sub(1);

    for (i, param) in params.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        if i == last && params.len() > 1 && (param.starts_with(':') || param.contains(' ')) {
            out.push(':');
        }
        out.push_str(param);
    }

    out.push_str("\r\n");
    out
}

/// Compute the delay before a reconnection attempt.
///
/// Base backoff grows quadratically with the attempt count, capped at 60
/// seconds, with jitter added on top.
pub fn reconnect_delay(attempts: u32) -> Duration {
    let base_secs = u64::from(attempts.saturating_mul(attempts).min(60));
    let jitter_ms = rand::thread_rng().gen_range(RECONNECT_JITTER_MS);
    Duration::from_millis(base_secs * 1000 + jitter_ms)
}

/// One upstream IRC session.
pub struct ConnectionOutgoing {
    id: ConnId,
    state: Mutex<ConnectionState>,
    registry: Arc<ConnectionRegistry>,
    broker: Arc<dyn Broker>,
    hooks: Arc<HookRegistry>,
    dispatcher: Arc<Dispatcher>,
    /// Guards the single pending reconnect timer for this connection.
    reconnect_pending: AtomicBool,
}

impl ConnectionOutgoing {
    /// Create an upstream connection and register it. Registration on
    /// construction plus removal on `destroy()` keeps at most one live
    /// instance reachable per id.
    pub fn new(
        id: Option<ConnId>,
        store: StateStore,
        registry: Arc<ConnectionRegistry>,
        broker: Arc<dyn Broker>,
        hooks: Arc<HookRegistry>,
        dispatcher: Arc<Dispatcher>,
    ) -> Arc<Self> {
        let id = id.unwrap_or_default();
        let state = ConnectionState::new(id.clone(), ConnType::Outgoing, store);

        let con = Arc::new(Self {
            id,
            state: Mutex::new(state),
            registry,
            broker,
            hooks,
            dispatcher,
            reconnect_pending: AtomicBool::new(false),
        });

        con.registry.insert_outgoing(Arc::clone(&con));
        con
    }

    pub fn id(&self) -> &ConnId {
        &self.id
    }

    /// Exclusive access to this session's state.
    pub async fn state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().await
    }

    /// Unregister and drop the persisted state.
    pub async fn destroy(&self) {
        self.registry.remove(&self.id);
        let mut state = self.state.lock().await;
        if let Err(e) = state.destroy().await {
            warn!(id = %self.id, error = %e, "Failed to destroy connection state");
        }
    }

    /// Request the socket worker to establish the upstream connection.
    ///
    /// Purely declarative: publishes a `connection.open` request (unless a
    /// `connection_to_open` hook prevents it, or host/port are missing).
    pub async fn open(&self) -> Result<(), ConnectionError> {
        let mut state = self.state.lock().await;
        state.load_connection_info().await?;

        let request = OpenRequest {
            id: self.id.clone(),
            host: state.host.clone(),
            port: state.port,
            tls: state.tls,
            bind_address: state.bind_host.clone().unwrap_or_default(),
            servername: None,
        };
        drop(state);

        let event = self
            .hooks
            .emit(HookPayload::ConnectionToOpen {
                id: self.id.clone(),
                request,
            })
            .await;
        if event.prevent {
            debug!(id = %self.id, "connection_to_open prevented");
            return Ok(());
        }
        let HookPayload::ConnectionToOpen { request, .. } = event.payload else {
            return Ok(());
        };

        let has_host = request.host.as_deref().is_some_and(|h| !h.is_empty());
        let has_port = request.port.is_some_and(|p| p != 0);
        if has_host && has_port {
            self.broker
                .send_to_sockets(SocketCommand::Open(request))
                .await?;
        }

        Ok(())
    }

    /// Publish raw bytes for the upstream socket.
    pub async fn write(&self, data: impl Into<String>) -> Result<(), crate::broker::BrokerError> {
        self.broker
            .send_to_sockets(SocketCommand::Data {
                id: self.id.clone(),
                data: data.into(),
            })
            .await
    }

    /// Serialize and publish one IRC line.
    pub async fn write_line(&self, params: &[&str]) -> Result<(), crate::broker::BrokerError> {
        self.write(format_line(params)).await
    }

    /// Ask the socket worker to close the upstream socket. Local state is
    /// only updated when the closed notification comes back.
    pub async fn close(&self) -> Result<(), crate::broker::BrokerError> {
        self.broker
            .send_to_sockets(SocketCommand::Close {
                id: self.id.clone(),
            })
            .await
    }

    /// Resolve the linked client connections through the registry.
    ///
    /// Clients that are already gone resolve to nothing and are skipped;
    /// `exclude` filters out one connection (typically the sender).
    pub fn clients(
        &self,
        state: &ConnectionState,
        exclude: Option<&ConnId>,
    ) -> Vec<Arc<dyn ClientLink>> {
        state
            .linked_incoming_con_ids
            .iter()
            .filter(|con_id| exclude != Some(*con_id))
            .filter_map(|con_id| self.registry.client(con_id))
            .collect()
    }

    /// Attach a client connection to this upstream session.
    pub async fn link_client(&self, con_id: ConnId) -> Result<(), ConnectionError> {
        let mut state = self.state.lock().await;
        state.maybe_load().await?;
        state.linked_incoming_con_ids.insert(con_id);
        state.save().await?;
        Ok(())
    }

    /// Detach a client connection.
    pub async fn unlink_client(&self, con_id: &ConnId) -> Result<(), ConnectionError> {
        let mut state = self.state.lock().await;
        state.maybe_load().await?;
        state.linked_incoming_con_ids.remove(con_id);
        state.save().await?;
        Ok(())
    }

    /// Process one inbound line from the upstream network.
    ///
    /// Runs the command dispatch table; unless dispatch suppresses it, the
    /// message fans out to every linked, registered client (after the
    /// `message_to_clients` hook had its say).
    pub async fn message_from_upstream(
        &self,
        message: Message,
        raw: &str,
    ) -> Result<(), ConnectionError> {
        let mut state = self.state.lock().await;
        state.maybe_load().await?;
        trace!(id = %self.id, line = raw, "Upstream message");

        let mut ctx = UpstreamContext {
            upstream: self,
            state: &mut state,
        };
        let outcome = self.dispatcher.dispatch(&mut ctx, &message).await;
        if outcome == Dispatch::Suppress {
            return Ok(());
        }

        let clients: Vec<Arc<dyn ClientLink>> = self
            .clients(&state, None)
            .into_iter()
            .filter(|client| client.net_registered())
            .collect();
        drop(state);

        let event = self
            .hooks
            .emit(HookPayload::MessageToClients { clients, message })
            .await;
        if event.prevent {
            return Ok(());
        }
        let HookPayload::MessageToClients { clients, message } = event.payload else {
            return Ok(());
        };

        for client in clients {
            if let Err(e) = client.write_msg(&message).await {
                warn!(id = %self.id, client = %client.con_id(), error = %e, "Failed to relay to client");
            }
        }

        Ok(())
    }

    /// The socket worker established our upstream socket: reset the
    /// registration-phase state and send the registration burst.
    pub async fn on_upstream_connected(&self) -> Result<(), ConnectionError> {
        let mut state = self.state.lock().await;
        state.maybe_load().await?;

        // Reset some state. It gets re-populated when the upstream sends
        // its registration burst again.
        state.connected = true;
        state.net_registered = false;
        state.received_motd = false;
        state.isupports = Vec::new();
        state.registration_lines = Vec::new();

        // temp_set() saves the state
        state.temp_set("reconnecting", None::<u32>).await?;

        info!(id = %self.id, host = ?state.host, "Upstream connected");

        self.hooks
            .emit(HookPayload::ConnectionOpen {
                id: self.id.clone(),
            })
            .await;

        self.write_line(&["CAP", "LS", "302"]).await?;

        if let Some(password) = state.password.as_deref().filter(|p| !p.is_empty()) {
            self.write_line(&["PASS", password]).await?;
        }
        self.write_line(&["NICK", &state.nick]).await?;
        self.write_line(&["USER", &state.username, "*", "*", &state.realname])
            .await?;

        for client in self.clients(&state, None) {
            if let Err(e) = client.write_status("Network connected!").await {
                warn!(id = %self.id, client = %client.con_id(), error = %e, "Failed to notify client");
            }
        }

        Ok(())
    }

    /// The upstream socket closed (or failed to open).
    pub async fn on_upstream_closed(
        self: &Arc<Self>,
        err: Option<String>,
    ) -> Result<(), ConnectionError> {
        let mut state = self.state.lock().await;
        state.maybe_load().await?;

        // If we were trying to reconnect, continue with that instead
        if state.temp_get::<u32>("reconnecting").is_some() {
            drop(state);
            self.reconnect().await?;
            return Ok(());
        }

        let should_reconnect = state.connected && state.net_registered;

        state.connected = false;
        state.net_registered = false;
        state.received_motd = false;

        let clients = self.clients(&state, None);

        // Leave every joined channel on the client side before anything
        // else; the buffers stay so we can rejoin after a reconnect.
        for buffer in state.buffers.values_mut() {
            if buffer.joined {
                for client in &clients {
                    let nick = client.nick();
                    if let Err(e) = client.write_msg_from(&nick, "PART", &[&buffer.name]).await {
                        warn!(id = %self.id, client = %client.con_id(), error = %e, "Failed to send synthetic PART");
                    }
                }
            }
            buffer.joined = false;
        }

        state.save().await?;
        drop(state);

        self.hooks
            .emit(HookPayload::ConnectionClose {
                id: self.id.clone(),
            })
            .await;

        for client in &clients {
            let mut status = String::from("Network disconnected");
            if let Some(err) = err.as_deref().filter(|e| !e.is_empty()) {
                status.push(' ');
                status.push_str(err);
            }
            if let Err(e) = client.write_status(&status).await {
                warn!(id = %self.id, client = %client.con_id(), error = %e, "Failed to notify client");
            }

            // A client that attached before the upstream ever registered
            // still needs to reach an interactive state.
            if !client.net_registered()
                && let Err(e) = client.register_local_client().await
            {
                warn!(id = %self.id, client = %client.con_id(), error = %e, "Failed to locally register client");
            }
        }

        if should_reconnect {
            self.reconnect().await?;
        }

        Ok(())
    }

    /// Schedule a reconnection attempt.
    ///
    /// At most one timer is pending per connection; a second call while one
    /// is pending is a no-op. The deferred open no-ops if the connection
    /// came back up in the meantime (e.g. a forced manual reconnect).
    pub async fn reconnect(self: &Arc<Self>) -> Result<(), ConnectionError> {
        if self.reconnect_pending.swap(true, Ordering::SeqCst) {
            debug!(id = %self.id, "Reconnect timer already pending");
            return Ok(());
        }

        let mut state = self.state.lock().await;
        let attempts = state.temp_get::<u32>("reconnecting").unwrap_or(0) + 1;
        state.temp_set("reconnecting", Some(attempts)).await?;
        drop(state);

        let delay = reconnect_delay(attempts);
        info!(id = %self.id, attempt = attempts, delay_ms = delay.as_millis() as u64, "Reconnection attempt scheduled");

        let con = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            con.reconnect_pending.store(false, Ordering::SeqCst);

            // The user may have forced a reconnect since
            if con.state.lock().await.connected {
                return;
            }

            if let Err(e) = con.open().await {
                warn!(id = %con.id, error = %e, "Deferred reconnect failed");
            }
        });

        Ok(())
    }

    /// Whether a reconnect timer is currently pending.
    pub fn reconnect_timer_pending(&self) -> bool {
        self.reconnect_pending.load(Ordering::SeqCst)
    }

    /// Value of an ISUPPORT token advertised by the upstream server.
    pub async fn isupport_token(&self, name: &str) -> Option<String> {
        self.state.lock().await.isupport_token(name)
    }

    /// Whether a name is a channel name per the upstream's CHANTYPES.
    pub async fn is_channel_name(&self, name: &str) -> bool {
        self.state.lock().await.is_channel_name(name)
    }
}
