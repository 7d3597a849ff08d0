//! Upstream command dispatch.
//!
//! Every inbound upstream line runs through the [`Dispatcher`] before
//! fan-out. The whole [`CommandTable`] is replaceable at runtime: readers
//! clone the current `Arc` out of the swap lock and never hold the lock
//! across an await, so a `replace()` takes effect on the next message
//! without disturbing in-flight dispatches.

mod channel;
mod misc;
mod registration;

use crate::connection::ConnectionOutgoing;
use crate::error::HandlerError;
use crate::state::ConnectionState;
use async_trait::async_trait;
use parking_lot::RwLock;
use slbnc_proto::Message;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Whether a dispatched message continues to linked clients.
///
/// Only an explicit `Suppress` stops fan-out; unknown commands and handler
/// faults fall through to `Relay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Relay,
    Suppress,
}

/// Result type for upstream command handlers.
pub type HandlerResult = Result<Dispatch, HandlerError>;

/// Context handed to each upstream command handler.
///
/// The state is the upstream's, borrowed exclusively for the duration of
/// the dispatch turn; `upstream` gives handlers the write path back to the
/// network.
pub struct UpstreamContext<'a> {
    pub upstream: &'a ConnectionOutgoing,
    pub state: &'a mut ConnectionState,
}

/// Handler for one inbound upstream command.
#[async_trait]
pub trait UpstreamCommand: Send + Sync {
    async fn handle(&self, ctx: &mut UpstreamContext<'_>, msg: &Message) -> HandlerResult;
}

/// Mapping from uppercase command token to handler.
pub struct CommandTable {
    handlers: HashMap<&'static str, Box<dyn UpstreamCommand>>,
}

impl CommandTable {
    /// An empty table.
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// The standard table with all built-in handlers registered.
    pub fn standard() -> Self {
        let mut table = Self::empty();

        // Registration burst numerics
        table.insert("001", Box::new(registration::WelcomeHandler));
        for numeric in ["002", "003", "004"] {
            table.insert(numeric, Box::new(registration::RegistrationLineHandler));
        }
        table.insert("005", Box::new(registration::IsupportHandler));

        // LUSERS numerics are part of the replayable burst
        for numeric in ["250", "251", "252", "253", "254", "255", "265", "266"] {
            table.insert(numeric, Box::new(registration::RegistrationLineHandler));
        }

        // End of MOTD / no MOTD
        table.insert("376", Box::new(registration::MotdEndHandler));
        table.insert("422", Box::new(registration::MotdEndHandler));

        // Channel membership tracking
        table.insert("JOIN", Box::new(channel::JoinHandler));
        table.insert("PART", Box::new(channel::PartHandler));
        table.insert("KICK", Box::new(channel::KickHandler));

        table.insert("PING", Box::new(misc::PingHandler));
        table.insert("NICK", Box::new(misc::NickHandler));

        table
    }

    /// Register a handler for a command token.
    pub fn insert(&mut self, command: &'static str, handler: Box<dyn UpstreamCommand>) {
        self.handlers.insert(command, handler);
    }

    fn get(&self, command: &str) -> Option<&dyn UpstreamCommand> {
        self.handlers.get(command).map(Box::as_ref)
    }
}

/// Atomically replaceable dispatch table.
pub struct Dispatcher {
    table: RwLock<Arc<CommandTable>>,
}

impl Dispatcher {
    pub fn new(table: CommandTable) -> Self {
        Self {
            table: RwLock::new(Arc::new(table)),
        }
    }

    /// Swap in a whole new table. In-flight dispatches finish against the
    /// table they started with.
    pub fn replace(&self, table: CommandTable) {
        *self.table.write() = Arc::new(table);
    }

    /// Run a message through the current table.
    pub async fn dispatch(&self, ctx: &mut UpstreamContext<'_>, msg: &Message) -> Dispatch {
        let command = msg.command.to_ascii_uppercase();
        let table = self.table.read().clone();

        let Some(handler) = table.get(&command) else {
            return Dispatch::Relay;
        };

        match handler.handle(ctx, msg).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    command = %command,
                    error = %e,
                    code = e.error_code(),
                    "Upstream command handler failed"
                );
                Dispatch::Relay
            }
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(CommandTable::standard())
    }
}
