//! In-process broker transport over tokio channels.
//!
//! Used when the socket and protocol roles run in a single process, and by
//! the test suite. Channels are unbounded: the protocol worker must never
//! stall on socket-side backpressure.

use super::{Broker, BrokerError, SocketCommand, SocketEvent};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// In-process [`Broker`] implementation.
pub struct MemoryBroker {
    commands_tx: mpsc::UnboundedSender<SocketCommand>,
}

/// The socket-worker side of an in-process broker: injects socket events
/// and drains the commands the protocol worker published.
pub struct SocketSide {
    events_tx: mpsc::UnboundedSender<SocketEvent>,
    commands_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<SocketCommand>>,
}

impl MemoryBroker {
    /// Create a linked broker pair: the protocol side, its inbound event
    /// stream, and the socket side.
    pub fn new() -> (
        Arc<Self>,
        mpsc::UnboundedReceiver<SocketEvent>,
        SocketSide,
    ) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let broker = Arc::new(Self { commands_tx });
        let sockets = SocketSide {
            events_tx,
            commands_rx: tokio::sync::Mutex::new(commands_rx),
        };

        (broker, events_rx, sockets)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn send_to_sockets(&self, command: SocketCommand) -> Result<(), BrokerError> {
        self.commands_tx
            .send(command)
            .map_err(|_| BrokerError::Closed)
    }
}

impl SocketSide {
    /// Inject a socket event into the protocol worker's queue.
    pub fn send_to_worker(&self, event: SocketEvent) -> Result<(), BrokerError> {
        self.events_tx.send(event).map_err(|_| BrokerError::Closed)
    }

    /// Wait for the next command published by the protocol worker.
    pub async fn next_command(&self) -> Option<SocketCommand> {
        self.commands_rx.lock().await.recv().await
    }

    /// Drain every command currently queued.
    pub async fn drain_commands(&self) -> Vec<SocketCommand> {
        let mut rx = self.commands_rx.lock().await;
        let mut drained = Vec::new();
        while let Ok(command) = rx.try_recv() {
            drained.push(command);
        }
        drained
    }
}
