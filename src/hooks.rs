//! Named extension points.
//!
//! Emission builds a mutable [`HookEvent`] and runs every handler
//! registered for that hook in registration order. Handlers may rewrite the
//! payload and may set `prevent`; emission is never short-circuited - all
//! handlers see the event, and the caller inspects the final `prevent`
//! flag afterwards. A fault in one handler is logged and must not stop the
//! rest.

use crate::broker::OpenRequest;
use crate::connection::ClientLink;
use crate::registry::ConnId;
use async_trait::async_trait;
use parking_lot::RwLock;
use slbnc_proto::Message;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// The extension points the worker emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookName {
    /// About to publish a `connection.open` request. Preventable; the
    /// request itself is mutable.
    ConnectionToOpen,
    /// Upstream socket established.
    ConnectionOpen,
    /// Upstream socket closed.
    ConnectionClose,
    /// An upstream message is about to fan out to clients. Preventable;
    /// the client list and the message are mutable.
    MessageToClients,
}

/// The mutable payload carried by a hook emission.
pub enum HookPayload {
    ConnectionToOpen {
        id: ConnId,
        request: OpenRequest,
    },
    ConnectionOpen {
        id: ConnId,
    },
    ConnectionClose {
        id: ConnId,
    },
    MessageToClients {
        clients: Vec<Arc<dyn ClientLink>>,
        message: Message,
    },
}

impl HookPayload {
    /// Which extension point this payload belongs to.
    pub fn name(&self) -> HookName {
        match self {
            HookPayload::ConnectionToOpen { .. } => HookName::ConnectionToOpen,
            HookPayload::ConnectionOpen { .. } => HookName::ConnectionOpen,
            HookPayload::ConnectionClose { .. } => HookName::ConnectionClose,
            HookPayload::MessageToClients { .. } => HookName::MessageToClients,
        }
    }
}

/// The event handlers receive: the payload plus the short-circuit flag.
pub struct HookEvent {
    pub payload: HookPayload,
    pub prevent: bool,
}

/// A hook handler. Handlers run with exclusive access to the event.
#[async_trait]
pub trait HookHandler: Send + Sync {
    async fn run(&self, event: &mut HookEvent) -> anyhow::Result<()>;
}

/// Registry of hook handlers, ordered per extension point.
#[derive(Default)]
pub struct HookRegistry {
    handlers: RwLock<HashMap<HookName, Vec<Arc<dyn HookHandler>>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Handlers run in registration order.
    pub fn register(&self, name: HookName, handler: Arc<dyn HookHandler>) {
        self.handlers.write().entry(name).or_default().push(handler);
    }

    /// Emit an event to every handler registered for its hook.
    ///
    /// Returns the final event after all handlers have run.
    pub async fn emit(&self, payload: HookPayload) -> HookEvent {
        let name = payload.name();
        let handlers: Vec<Arc<dyn HookHandler>> = self
            .handlers
            .read()
            .get(&name)
            .cloned()
            .unwrap_or_default();

        let mut event = HookEvent {
            payload,
            prevent: false,
        };

        for handler in handlers {
            if let Err(e) = handler.run(&mut event).await {
                warn!(hook = ?name, error = %e, "Hook handler failed");
            }
        }

        event
    }
}
