//! Transport abstraction layer for Confab.
//!
//! The room service never talks to a pub/sub backend directly. It goes
//! through the [`ChatTransport`] trait, which covers exactly what a chat
//! room needs: subscribe/unsubscribe, publish, history, here-now presence,
//! and an event feed of incoming messages, presence changes, and
//! connection status.
//!
//! # Feature Flags
//!
//! - `local` (default): [`LocalHub`]/[`LocalTransport`], an in-memory
//!   pub/sub backend for demos and tests

#![allow(async_fn_in_trait)]

mod error;
mod event;
#[cfg(feature = "local")]
mod local;
mod request;

pub use error::TransportError;
pub use event::{
    MessageEvent, PresenceEvent, RequestCategory, StatusCategory, StatusEvent,
    TransportEvent,
};
#[cfg(feature = "local")]
pub use local::{ClientId, LocalHub, LocalTransport};
pub use request::{
    DEFAULT_HISTORY_LIMIT, HistoryPage, HistoryRequest, PresenceSnapshot,
    PublishReceipt, PublishRequest,
};

use std::future::Future;

use confab_protocol::{RoomId, UserId};
use tokio::sync::mpsc;

/// Receiving end of a transport's event feed.
pub type EventFeed = mpsc::UnboundedReceiver<TransportEvent>;

/// Sending end of a transport's event feed.
pub type EventSink = mpsc::UnboundedSender<TransportEvent>;

/// A pub/sub backend as seen by one chat client.
///
/// Subscription calls are fire-and-forget: their outcome arrives later as
/// a [`TransportEvent::Status`] on the event feed. Requests (`publish`,
/// `fetch_history`, `fetch_presence`) complete through their returned
/// future. The futures must be `Send` because the room service drives
/// them from spawned Tokio tasks.
///
/// Timeouts and retries are the transport's business; the room service
/// adds neither.
pub trait ChatTransport: Send + Sync + 'static {
    /// Starts the live subscription for a room (with presence).
    fn subscribe(&self, room_id: &RoomId);

    /// Ends the live subscription for a room.
    fn unsubscribe(&self, room_id: &RoomId);

    /// Whether a live subscription for the room is currently up.
    fn is_subscribed(&self, room_id: &RoomId) -> bool;

    /// The identity this client publishes as.
    fn current_sender_id(&self) -> UserId;

    /// Publishes a payload to a room.
    fn publish(
        &self,
        request: PublishRequest,
    ) -> impl Future<Output = Result<PublishReceipt, TransportError>> + Send;

    /// Fetches stored messages. `Ok(None)` means the backend returned no
    /// page at all (as opposed to an empty one).
    fn fetch_history(
        &self,
        request: HistoryRequest,
    ) -> impl Future<Output = Result<Option<HistoryPage>, TransportError>> + Send;

    /// Fetches the here-now occupant list for a room.
    fn fetch_presence(
        &self,
        room_id: RoomId,
    ) -> impl Future<Output = Result<Option<PresenceSnapshot>, TransportError>> + Send;

    /// Hands out the event feed. Only the first call returns `Some`; the
    /// feed has exactly one consumer.
    fn take_event_feed(&self) -> Option<EventFeed>;
}
