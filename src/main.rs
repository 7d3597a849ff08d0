//! slbnc - Straylight IRC Bouncer (protocol worker)
//!
//! Maintains persistent upstream IRC sessions on behalf of client sessions
//! and multiplexes traffic between them. Sockets live in a separate worker
//! role; the two halves meet only at the message broker.

mod broker;
mod commands;
mod config;
mod connection;
mod crypt;
mod db;
mod error;
mod hooks;
mod registry;
mod state;
mod worker;

use crate::broker::MemoryBroker;
use crate::commands::Dispatcher;
use crate::config::Config;
use crate::crypt::Crypt;
use crate::db::Database;
use crate::hooks::HookRegistry;
use crate::registry::ConnectionRegistry;
use crate::state::StateStore;
use crate::worker::Worker;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path, error = %e, "Failed to load config");
        e
    })?;

    info!(
        status_nick = %config.bouncer.status_nick,
        "Starting slbnc protocol worker"
    );

    // Relational storage (users, networks)
    let db = Database::new(&config.database.path).await?;

    // Connection-state store
    let store = StateStore::open(&config.state.path)?;

    // Secret-field transform for stored SASL credentials
    let crypt = Arc::new(Crypt::new(&config.secrets.key));

    let registry = Arc::new(ConnectionRegistry::new());
    let hooks = Arc::new(HookRegistry::new());
    let dispatcher = Arc::new(Dispatcher::default());

    // TODO: AMQP transport for split socket/protocol deployments; the
    // in-process broker covers the single-process mode until then.
    let (broker, events, sockets) = MemoryBroker::new();

    let worker = Worker::new(
        registry,
        broker,
        hooks,
        dispatcher,
        store,
        db,
        crypt,
    );

    // Bring persisted upstream sessions back up
    let restored = worker.restore().await?;
    info!(count = restored, "Upstream sessions restored");

    // The socket side of the broker belongs to the socket worker role; it
    // must stay alive for the event stream to stay open.
    let _sockets = sockets;

    worker.run(events).await;

    Ok(())
}
