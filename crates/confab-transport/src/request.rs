//! Request and response types for transport operations.

use confab_protocol::{Message, PublishPayload, RoomId, SentAt, UserId};

/// Default number of messages per history page.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// A publish request.
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub room_id: RoomId,
    pub payload: PublishPayload,
    /// Whether the backend should keep the message for history fetches.
    pub store_in_history: bool,
}

impl PublishRequest {
    /// Publishes `payload` to `room_id`, stored in history.
    pub fn new(room_id: RoomId, payload: PublishPayload) -> Self {
        Self {
            room_id,
            payload,
            store_in_history: true,
        }
    }
}

/// What the backend returns for a successful publish.
#[derive(Debug, Clone)]
pub struct PublishReceipt {
    /// Backend-assigned time token of the stored message.
    pub time_token: SentAt,
    /// Backend's informational response text.
    pub info: String,
}

/// Parameters for a history fetch.
///
/// With no `start`, the backend returns the most recent `limit` messages.
/// With `start` and `reverse`, it returns messages strictly newer than
/// `start`, oldest first. With `start` and no `reverse`, it pages
/// backwards from `start`.
#[derive(Debug, Clone)]
pub struct HistoryRequest {
    pub room_id: RoomId,
    pub start: Option<SentAt>,
    pub limit: usize,
    pub reverse: bool,
    pub include_time_token: bool,
}

impl HistoryRequest {
    /// The default page: most recent [`DEFAULT_HISTORY_LIMIT`] messages.
    pub fn latest(room_id: RoomId) -> Self {
        Self {
            room_id,
            start: None,
            limit: DEFAULT_HISTORY_LIMIT,
            reverse: false,
            include_time_token: true,
        }
    }

    /// Everything strictly newer than `token`, oldest first.
    pub fn newer_than(room_id: RoomId, token: SentAt) -> Self {
        Self {
            start: Some(token),
            reverse: true,
            ..Self::latest(room_id)
        }
    }

    /// Overrides the page size.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// One page of stored messages.
#[derive(Debug, Clone, Default)]
pub struct HistoryPage {
    /// Token of the first message in the page.
    pub start: SentAt,
    /// Token of the last message in the page.
    pub end: SentAt,
    pub messages: Vec<Message>,
}

/// The here-now occupant list of a room.
#[derive(Debug, Clone, Default)]
pub struct PresenceSnapshot {
    pub occupancy: usize,
    pub uuids: Vec<UserId>,
}
