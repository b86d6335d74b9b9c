//! Events a transport pushes asynchronously.
//!
//! Categories arrive in no guaranteed relative order: a presence change
//! may overtake the message that caused it.

use confab_protocol::{RoomId, SentAt, UserId};

use crate::TransportError;

/// One item on a transport's event feed.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A message was published to a subscribed room.
    Message(MessageEvent),
    /// Someone joined, left, or timed out of a subscribed room.
    Presence(PresenceEvent),
    /// The subscription status changed, or a subscription request failed.
    Status(Result<StatusEvent, TransportError>),
}

/// A message-received event. The payload is untrusted bytes.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    /// Channel the message arrived on.
    pub room_id: RoomId,
    /// Encoded [`PublishPayload`](confab_protocol::PublishPayload).
    pub payload: Vec<u8>,
    /// Backend-assigned time token.
    pub time_token: SentAt,
}

/// A presence-changed event.
#[derive(Debug, Clone, Default)]
pub struct PresenceEvent {
    pub room_id: RoomId,
    pub joined: Vec<UserId>,
    pub timedout: Vec<UserId>,
    pub left: Vec<UserId>,
    /// Occupancy reported by the backend after the change.
    pub occupancy: usize,
}

/// A successful status report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusEvent {
    pub response: StatusCategory,
    pub request: RequestCategory,
}

impl StatusEvent {
    /// Creates a status event.
    pub fn new(response: StatusCategory, request: RequestCategory) -> Self {
        Self { response, request }
    }
}

/// What the backend said happened.
///
/// Transports map "unexpected disconnect" onto [`StatusCategory::Disconnected`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCategory {
    Acknowledgment,
    Connected,
    Reconnected,
    Disconnected,
    Cancelled,
    Error,
}

/// Which kind of request the status is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestCategory {
    Subscribe,
    Unsubscribe,
    Send,
    History,
    Presence,
    Other,
}

impl std::fmt::Display for StatusCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Acknowledgment => "acknowledgment",
            Self::Connected => "connected",
            Self::Reconnected => "reconnected",
            Self::Disconnected => "disconnected",
            Self::Cancelled => "cancelled",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}
