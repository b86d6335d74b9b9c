//! Identity types and the small entities around a chat room.
//!
//! Everything here is pure data. Identity rules live on the types
//! themselves: a [`User`] compares equal to another `User` with the same
//! id no matter what its display name says.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Generates a string-backed id newtype.
///
/// Ids are `#[serde(transparent)]`, so `UserId("user-1")` serializes as
/// `"user-1"` rather than `{ "0": "user-1" }`.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize,
            Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Returns the id as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id! {
    /// Stable identifier of a chat room (the pub/sub channel name).
    RoomId
}

string_id! {
    /// Identifier of a user, as known to the transport.
    UserId
}

string_id! {
    /// Globally unique message identifier (a UUID string in practice).
    MessageId
}

impl MessageId {
    /// Generates a fresh random (v4) message id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

// ---------------------------------------------------------------------------
// Room
// ---------------------------------------------------------------------------

/// The chat room a service instance is bound to.
///
/// A room is set once when the service is built and never reassigned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Room {
    /// Primary key; doubles as the pub/sub channel name.
    pub id: RoomId,
    /// Human-readable name.
    pub name: String,
    /// Optional one-line description.
    #[serde(default)]
    pub description: Option<String>,
    /// Optional avatar reference (an asset name, not image data).
    #[serde(default)]
    pub avatar: Option<String>,
}

impl Room {
    /// Creates a room with just an id and a name.
    pub fn new(id: impl Into<RoomId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            avatar: None,
        }
    }
}

impl Default for Room {
    fn default() -> Self {
        Self {
            id: RoomId::from("demo"),
            name: "Demo".to_owned(),
            description: Some("Chat.".to_owned()),
            avatar: Some("Test".to_owned()),
        }
    }
}

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A chat participant. Equality and hashing use the id only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Transport-level identity.
    pub id: UserId,
    /// Display name shown next to messages.
    pub name: String,
}

impl User {
    /// Creates a user.
    pub fn new(id: impl Into<UserId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    /// The name to render for this user.
    pub fn display_name(&self) -> &str {
        &self.name
    }
}

impl PartialEq for User {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for User {}

impl std::hash::Hash for User {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

// ---------------------------------------------------------------------------
// ConnectionState
// ---------------------------------------------------------------------------

/// Whether the room's live subscription is up.
///
/// Never stored by the service: it is always derived from the transport's
/// own subscription status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    Connected,
    NotConnected,
}

impl ConnectionState {
    /// Maps a subscription flag to a state.
    pub fn from_subscribed(subscribed: bool) -> Self {
        if subscribed {
            Self::Connected
        } else {
            Self::NotConnected
        }
    }

    /// Returns `true` for [`ConnectionState::Connected`].
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => write!(f, "Connected"),
            Self::NotConnected => write!(f, "NotConnected"),
        }
    }
}

// ---------------------------------------------------------------------------
// PresenceChange
// ---------------------------------------------------------------------------

/// A delta applied to the occupant set, as reported to observers.
///
/// `removed` is the union of timed-out and left ids. Snapshot refreshes
/// only ever fill `joined`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceChange {
    pub joined: Vec<UserId>,
    pub removed: Vec<UserId>,
}

impl PresenceChange {
    /// Returns `true` if nothing joined and nothing was removed.
    pub fn is_empty(&self) -> bool {
        self.joined.is_empty() && self.removed.is_empty()
    }
}
