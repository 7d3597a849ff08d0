//! The protocol worker: routes broker events to connection objects.
//!
//! Events for one connection id arrive in order, so each lifecycle method
//! runs to completion before the next event for that session is handled.
//! Unknown ids mean the connection died between publish and delivery and
//! are skipped.

use crate::broker::{Broker, SocketEvent};
use crate::commands::Dispatcher;
use crate::connection::{ConnectionError, ConnectionOutgoing};
use crate::crypt::{Crypt, CryptError};
use crate::db::{Database, DbError, Network};
use crate::hooks::HookRegistry;
use crate::registry::{ConnId, ConnectionRegistry};
use crate::state::{ConnType, SaslCredentials, StateError, StateStore};
use slbnc_proto::Message;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Errors from worker-level operations.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("database error: {0}")]
    Db(#[from] DbError),

    #[error("crypt error: {0}")]
    Crypt(#[from] CryptError),
}

/// The protocol worker role.
pub struct Worker {
    registry: Arc<ConnectionRegistry>,
    broker: Arc<dyn Broker>,
    hooks: Arc<HookRegistry>,
    dispatcher: Arc<Dispatcher>,
    store: StateStore,
    db: Database,
    crypt: Arc<Crypt>,
}

impl Worker {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        broker: Arc<dyn Broker>,
        hooks: Arc<HookRegistry>,
        dispatcher: Arc<Dispatcher>,
        store: StateStore,
        db: Database,
        crypt: Arc<Crypt>,
    ) -> Self {
        Self {
            registry,
            broker,
            hooks,
            dispatcher,
            store,
            db,
            crypt,
        }
    }

    /// Recreate connection objects for every persisted upstream session and
    /// re-open the ones that were connected when the process died.
    pub async fn restore(&self) -> Result<usize, WorkerError> {
        let records = self.store.load_all()?;
        let mut restored = 0;

        for record in records {
            if record.con_type != ConnType::Outgoing {
                continue;
            }

            let was_connected = record.connected;
            let con = ConnectionOutgoing::new(
                Some(ConnId::from_string(record.con_id.clone())),
                self.store.clone(),
                Arc::clone(&self.registry),
                Arc::clone(&self.broker),
                Arc::clone(&self.hooks),
                Arc::clone(&self.dispatcher),
            );

            {
                let mut state = con.state().await;
                state.maybe_load().await?;
                // The socket died with the old process; so did any backoff
                // attempt. A leftover counter must not stretch the next one.
                state.connected = false;
                state.net_registered = false;
                state.temp_set("reconnecting", None::<u32>).await?;
            }

            if was_connected
                && let Err(e) = con.open().await
            {
                warn!(id = %con.id(), error = %e, "Failed to re-open restored connection");
            }

            restored += 1;
        }

        info!(count = restored, "Restored upstream connections from state store");
        Ok(restored)
    }

    /// Create and open an upstream connection from a stored network
    /// definition.
    pub async fn start_network(
        &self,
        network: &Network,
    ) -> Result<Arc<ConnectionOutgoing>, WorkerError> {
        let con = ConnectionOutgoing::new(
            None,
            self.store.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.broker),
            Arc::clone(&self.hooks),
            Arc::clone(&self.dispatcher),
        );

        {
            let mut state = con.state().await;
            state.maybe_load().await?;
            state.host = network.host.clone();
            state.port = network.port;
            state.tls = network.tls;
            state.bind_host = network.bind_host.clone();
            let nick = network.nick.clone().unwrap_or_default();
            state.nick = nick.clone();
            state.username = network.username.clone().unwrap_or_else(|| nick.clone());
            state.realname = network.realname.clone().unwrap_or(nick);
            state.password = network.password.clone();
            state.sasl = match (&network.sasl_account, network.sasl_pass(&self.crypt)?) {
                (Some(account), Some(password)) => Some(SaslCredentials {
                    account: account.clone(),
                    password,
                }),
                _ => None,
            };
            state.save().await?;
        }

        con.open().await?;
        Ok(con)
    }

    /// Resolve a user's network by name and start it.
    pub async fn start_network_by_name(
        &self,
        user_id: i64,
        name: &str,
    ) -> Result<Option<Arc<ConnectionOutgoing>>, WorkerError> {
        let Some(network) = self.db.users().get_network_by_name(user_id, name).await? else {
            return Ok(None);
        };
        Ok(Some(self.start_network(&network).await?))
    }

    /// Consume socket events until the broker goes away.
    pub async fn run(&self, mut events: mpsc::UnboundedReceiver<SocketEvent>) {
        info!("Protocol worker running");
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
        info!("Broker event stream ended, worker stopping");
    }

    async fn handle_event(&self, event: SocketEvent) {
        match event {
            SocketEvent::Connected { id } => {
                let Some(con) = self.registry.outgoing(&id) else {
                    debug!(id = %id, "Connected event for unknown connection");
                    return;
                };
                if let Err(e) = con.on_upstream_connected().await {
                    error!(id = %id, error = %e, "Failed to handle upstream connect");
                }
            }
            SocketEvent::Data { id, line } => {
                let Some(con) = self.registry.outgoing(&id) else {
                    debug!(id = %id, "Data event for unknown connection");
                    return;
                };
                let message = match Message::parse(&line) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(id = %id, error = %e, line = %line, "Unparseable upstream line");
                        return;
                    }
                };
                if let Err(e) = con.message_from_upstream(message, &line).await {
                    error!(id = %id, error = %e, "Failed to handle upstream message");
                }
            }
            SocketEvent::Closed { id, error } => {
                let Some(con) = self.registry.outgoing(&id) else {
                    debug!(id = %id, "Closed event for unknown connection");
                    return;
                };
                if let Err(e) = con.on_upstream_closed(error).await {
                    error!(id = %id, error = %e, "Failed to handle upstream close");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{MemoryBroker, SocketCommand, SocketSide};
    use crate::state::StoredConnection;
    use std::time::Duration;

    struct TestWorker {
        _dir: tempfile::TempDir,
        worker: Arc<Worker>,
        store: StateStore,
        registry: Arc<ConnectionRegistry>,
        broker: Arc<MemoryBroker>,
        hooks: Arc<HookRegistry>,
        dispatcher: Arc<Dispatcher>,
        sockets: SocketSide,
        events: Option<mpsc::UnboundedReceiver<SocketEvent>>,
        crypt: Arc<Crypt>,
        db: Database,
    }

    async fn test_worker() -> TestWorker {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path().join("state.redb")).unwrap();
        let db = Database::new(":memory:").await.unwrap();
        let crypt = Arc::new(Crypt::new("test secret"));
        let registry = Arc::new(ConnectionRegistry::new());
        let hooks = Arc::new(HookRegistry::new());
        let dispatcher = Arc::new(Dispatcher::default());
        let (broker, events, sockets) = MemoryBroker::new();

        let worker = Arc::new(Worker::new(
            Arc::clone(&registry),
            broker.clone(),
            Arc::clone(&hooks),
            Arc::clone(&dispatcher),
            store.clone(),
            db.clone(),
            Arc::clone(&crypt),
        ));

        TestWorker {
            _dir: dir,
            worker,
            store,
            registry,
            broker,
            hooks,
            dispatcher,
            sockets,
            events: Some(events),
            crypt,
            db,
        }
    }

    fn spawn_upstream(tw: &TestWorker) -> Arc<ConnectionOutgoing> {
        ConnectionOutgoing::new(
            None,
            tw.store.clone(),
            Arc::clone(&tw.registry),
            tw.broker.clone(),
            Arc::clone(&tw.hooks),
            Arc::clone(&tw.dispatcher),
        )
    }

    async fn next_data_line(sockets: &SocketSide) -> String {
        loop {
            let command = tokio::time::timeout(Duration::from_secs(5), sockets.next_command())
                .await
                .expect("timed out waiting for broker command")
                .expect("broker closed");
            if let SocketCommand::Data { data, .. } = command {
                return data;
            }
        }
    }

    #[tokio::test]
    async fn test_restore_reopens_connected_sessions() {
        let tw = test_worker().await;

        // A session that was connected when the process died, mid-backoff
        let mut record = StoredConnection::empty("con-restored".into(), ConnType::Outgoing);
        record.host = Some("irc.example.com".into());
        record.port = Some(6667);
        record.connected = true;
        record
            .temp
            .insert("reconnecting".into(), serde_json::json!(5));
        tw.store.save(&record).unwrap();

        let restored = tw.worker.restore().await.unwrap();
        assert_eq!(restored, 1);

        let id = ConnId::from_string("con-restored".into());
        let con = tw.registry.outgoing(&id).expect("connection restored");

        // The stale counter from the dead attempt is gone
        let state = con.state().await;
        assert_eq!(state.temp_get::<u32>("reconnecting"), None);
        assert!(!state.connected);
        drop(state);

        // And the session was asked to come back up
        assert!(matches!(
            tw.sockets.next_command().await,
            Some(SocketCommand::Open(_))
        ));
    }

    #[tokio::test]
    async fn test_restore_skips_disconnected_sessions() {
        let tw = test_worker().await;

        let mut record = StoredConnection::empty("con-idle".into(), ConnType::Outgoing);
        record.host = Some("irc.example.com".into());
        record.port = Some(6667);
        record.connected = false;
        tw.store.save(&record).unwrap();

        tw.worker.restore().await.unwrap();

        let id = ConnId::from_string("con-idle".into());
        assert!(tw.registry.outgoing(&id).is_some());
        assert!(tw.sockets.drain_commands().await.is_empty());
    }

    #[tokio::test]
    async fn test_event_routing_through_run_loop() {
        let mut tw = test_worker().await;
        let con = spawn_upstream(&tw);
        {
            let mut state = con.state().await;
            state.maybe_load().await.unwrap();
            state.host = Some("irc.example.com".into());
            state.port = Some(6667);
            state.nick = "alice".into();
            state.username = "alice".into();
            state.realname = "Alice".into();
            state.save().await.unwrap();
        }

        let events = tw.events.take().unwrap();
        let worker = Arc::clone(&tw.worker);
        tokio::spawn(async move { worker.run(events).await });

        // connected -> registration burst
        tw.sockets
            .send_to_worker(SocketEvent::Connected {
                id: con.id().clone(),
            })
            .unwrap();
        assert_eq!(next_data_line(&tw.sockets).await, "CAP LS 302\r\n");
        assert_eq!(next_data_line(&tw.sockets).await, "NICK alice\r\n");
        assert_eq!(next_data_line(&tw.sockets).await, "USER alice * * :Alice\r\n");

        // data -> dispatch (PING answered, suppressed)
        tw.sockets
            .send_to_worker(SocketEvent::Data {
                id: con.id().clone(),
                line: "PING :irc.example.com".into(),
            })
            .unwrap();
        assert_eq!(next_data_line(&tw.sockets).await, "PONG irc.example.com\r\n");

        // unparseable line and unknown id are skipped without fallout
        tw.sockets
            .send_to_worker(SocketEvent::Data {
                id: con.id().clone(),
                line: "  ".into(),
            })
            .unwrap();
        tw.sockets
            .send_to_worker(SocketEvent::Closed {
                id: ConnId::new(),
                error: None,
            })
            .unwrap();

        // closed -> lifecycle (not registered, so no reconnect)
        tw.sockets
            .send_to_worker(SocketEvent::Closed {
                id: con.id().clone(),
                error: Some("ECONNRESET".into()),
            })
            .unwrap();

        // The loop is still alive and the connection is marked down
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if !con.state().await.connected {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "close not processed");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_start_network_by_name() {
        let tw = test_worker().await;
        let users = tw.db.users();

        let user = users.add_user("alice", "pw").await.unwrap();
        let mut network = users.add_network(user.id, "libera").await.unwrap();
        network.host = Some("irc.libera.chat".into());
        network.port = Some(6697);
        network.tls = true;
        network.nick = Some("alice".into());
        network.sasl_account = Some("alice".into());
        network.set_sasl_pass(&tw.crypt, "sasl-secret").unwrap();
        users.save_network(&network).await.unwrap();

        let con = tw
            .worker
            .start_network_by_name(user.id, "libera")
            .await
            .unwrap()
            .expect("network exists");

        {
            let state = con.state().await;
            assert_eq!(state.host.as_deref(), Some("irc.libera.chat"));
            assert!(state.tls);
            assert_eq!(state.nick, "alice");
            assert_eq!(state.username, "alice");
            let sasl = state.sasl.as_ref().expect("sasl configured");
            assert_eq!(sasl.account, "alice");
            assert_eq!(sasl.password, "sasl-secret");
        }

        match tw.sockets.next_command().await {
            Some(SocketCommand::Open(request)) => {
                assert_eq!(request.host.as_deref(), Some("irc.libera.chat"));
                assert_eq!(request.port, Some(6697));
                assert!(request.tls);
            }
            other => panic!("expected connection.open, got {other:?}"),
        }

        assert!(
            tw.worker
                .start_network_by_name(user.id, "missing")
                .await
                .unwrap()
                .is_none()
        );
    }
}
