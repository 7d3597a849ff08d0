//! Unified error handling for the protocol worker.
//!
//! Layer-specific errors (broker, state store, database, crypt, config)
//! live next to their modules; this module holds the command-handler error
//! type shared by the dispatch pipeline.

use crate::broker::BrokerError;
use crate::state::StateError;
use thiserror::Error;

/// Errors that can occur while handling an inbound upstream command.
///
/// Handler faults never propagate past the dispatcher: they are logged and
/// the message falls through to the default relay behavior.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("not enough parameters")]
    NeedMoreParams,

    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl HandlerError {
    /// Get a static error code string for log labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NeedMoreParams => "need_more_params",
            Self::Broker(_) => "broker_error",
            Self::State(_) => "state_error",
            Self::Internal(_) => "internal_error",
        }
    }
}
