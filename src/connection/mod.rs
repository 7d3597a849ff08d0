//! Connection objects: the upstream session orchestrator and the client
//! connection seam.

mod incoming;
mod outgoing;


pub use incoming::{ClientLink, ConnectionIncoming};
pub use outgoing::{ConnectionOutgoing, format_line, reconnect_delay};

use crate::broker::BrokerError;
use crate::state::StateError;
use thiserror::Error;

/// Errors from connection lifecycle operations.
///
/// None of these are fatal to the process: the worker loop logs them and
/// the lifecycle always lands in a defined state.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("state error: {0}")]
    State(#[from] StateError),
}
