//! Unified error type for Confab.

use confab_protocol::{ProtocolError, RoomId};
use confab_room::RoomError;
use confab_transport::TransportError;

/// Top-level error that wraps every sub-crate error.
///
/// Using the `confab` meta-crate you deal with this one type; `?`
/// converts sub-crate errors through the generated `From` impls.
#[derive(Debug, thiserror::Error)]
pub enum ConfabError {
    /// A transport failure (network, rejected, timeout).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A payload could not be encoded or decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A room operation failed.
    #[error(transparent)]
    Room(#[from] RoomError),

    /// The client configuration could not be parsed.
    #[error("invalid client configuration: {0}")]
    Config(#[from] serde_json::Error),

    /// The transport's event feed was already handed to someone else.
    #[error("event feed for room {0} is already taken")]
    FeedUnavailable(RoomId),

    /// The lifecycle controller is no longer running.
    #[error("lifecycle controller for room {0} has stopped")]
    ControllerStopped(RoomId),
}
