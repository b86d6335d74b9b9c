//! Chat messages and the imprecise `sentAt` token they are ordered by.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::{MessageId, ProtocolError, RoomId, UserId};

// ---------------------------------------------------------------------------
// SentAt
// ---------------------------------------------------------------------------

/// Sortable send-time token: wall-clock seconds since the Unix epoch
/// multiplied by 10,000,000 (one unit = 100 ns).
///
/// Locally generated tokens are monotonic per sender only while the clock
/// is not adjusted. Ordering across senders is best-effort; this is not a
/// logical clock.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct SentAt(pub i64);

impl SentAt {
    /// Token units per second.
    pub const TICKS_PER_SECOND: i64 = 10_000_000;

    /// Nanoseconds per token unit.
    const NANOS_PER_TICK: u128 = 100;

    /// Token for the current wall-clock time.
    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    /// Token for an arbitrary wall-clock time. Times before the epoch
    /// produce negative tokens; out-of-range values saturate.
    pub fn from_system_time(time: SystemTime) -> Self {
        match time.duration_since(UNIX_EPOCH) {
            Ok(since) => Self(ticks(since)),
            Err(before) => Self(-ticks(before.duration())),
        }
    }

    /// Whole seconds since the epoch (`token / 10_000_000`).
    pub fn as_seconds(&self) -> i64 {
        self.0 / Self::TICKS_PER_SECOND
    }

    /// Wall-clock time at whole-second resolution.
    pub fn to_system_time(&self) -> SystemTime {
        let secs = self.as_seconds();
        if secs >= 0 {
            UNIX_EPOCH + Duration::from_secs(secs.unsigned_abs())
        } else {
            UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs())
        }
    }
}

fn ticks(duration: Duration) -> i64 {
    i64::try_from(duration.as_nanos() / SentAt::NANOS_PER_TICK)
        .unwrap_or(i64::MAX)
}

impl std::fmt::Display for SentAt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single chat message.
///
/// Identity is the `id` alone: two messages with the same id are the same
/// message even if their text or token differ. `PartialEq` and `Hash`
/// follow that rule, so deduplication can lean on them directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(rename = "uuid")]
    pub id: MessageId,
    pub text: String,
    pub sent_at: SentAt,
    pub sender_id: UserId,
    pub room_id: RoomId,
}

impl Message {
    /// Builds an outgoing message with a fresh id and a `sentAt` token
    /// taken from the wall clock.
    pub fn compose(
        text: impl Into<String>,
        sender_id: UserId,
        room_id: RoomId,
    ) -> Self {
        Self {
            id: MessageId::generate(),
            text: text.into(),
            sent_at: SentAt::now(),
            sender_id,
            room_id,
        }
    }

    /// Whole seconds since the epoch at which the message was sent.
    pub fn sent_at_seconds(&self) -> i64 {
        self.sent_at.as_seconds()
    }

    /// Wall-clock send time (whole-second resolution).
    pub fn sent_time(&self) -> SystemTime {
        self.sent_at.to_system_time()
    }

    /// The body this message is published with.
    pub fn to_payload(&self) -> PublishPayload {
        PublishPayload {
            sender_id: self.sender_id.clone(),
            text: self.text.clone(),
            uuid: Some(self.id.clone()),
        }
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Message {}

impl std::hash::Hash for Message {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

// ---------------------------------------------------------------------------
// PublishPayload
// ---------------------------------------------------------------------------

/// The body a client publishes to a room and receives back in
/// message-received events.
///
/// On the wire: `{"senderId": "...", "text": "...", "uuid": "..."}`.
/// `uuid` may be absent on payloads from other clients; such messages get
/// a freshly generated id when decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishPayload {
    pub sender_id: UserId,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<MessageId>,
}

impl PublishPayload {
    /// Turns a decoded payload into a [`Message`], stamping it with the
    /// transport's time token and the channel it arrived on.
    ///
    /// # Errors
    /// Returns [`ProtocolError::InvalidPayload`] if the sender id is empty.
    pub fn into_message(
        self,
        room_id: RoomId,
        sent_at: SentAt,
    ) -> Result<Message, ProtocolError> {
        if self.sender_id.as_str().is_empty() {
            return Err(ProtocolError::InvalidPayload(
                "empty senderId".into(),
            ));
        }
        Ok(Message {
            id: self.uuid.unwrap_or_else(MessageId::generate),
            text: self.text,
            sent_at,
            sender_id: self.sender_id,
            room_id,
        })
    }
}
