//! Error types for the room layer.

use std::fmt;

use confab_protocol::RoomId;
use confab_transport::TransportError;

/// The room operation a failure originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Send,
    History,
    Presence,
    Status,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Send => write!(f, "send"),
            Self::History => write!(f, "history"),
            Self::Presence => write!(f, "presence"),
            Self::Status => write!(f, "status"),
        }
    }
}

/// Errors that can occur during room operations.
///
/// These travel to the observer inside [`RoomEvent`](crate::RoomEvent)
/// results; none of them is fatal to the service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    /// The transport failed while performing `operation`.
    #[error("{operation} failed: {source}")]
    Transport {
        operation: Operation,
        #[source]
        source: TransportError,
    },

    /// The service was shut down and no longer accepts requests.
    #[error("room service for {0} has been shut down")]
    ShutDown(RoomId),
}

impl RoomError {
    pub(crate) fn transport(operation: Operation, source: TransportError) -> Self {
        Self::Transport { operation, source }
    }

    /// The operation that failed, if the failure came from the transport.
    pub fn operation(&self) -> Option<Operation> {
        match self {
            Self::Transport { operation, .. } => Some(*operation),
            Self::ShutDown(_) => None,
        }
    }
}
