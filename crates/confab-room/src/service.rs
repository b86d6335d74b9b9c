//! The room state aggregator.
//!
//! [`ChatRoomService`] owns the authoritative message log and occupant set
//! for one room. Transport callbacks and caller-initiated requests may hit
//! it from any thread at once, so each container sits behind its own
//! `RwLock`: readers share, a writer excludes everyone else on that
//! container, and a write to one never blocks the other.
//!
//! Every mutation emits its event while still holding the write lock it
//! mutated under. Two writers to the same container are therefore
//! serialized end-to-end, and their events reach the observer in the
//! same order their changes were applied.

use std::collections::HashSet;
use std::sync::{
    Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

use confab_protocol::{
    Codec, ConnectionState, JsonCodec, Message, PresenceChange,
    PublishPayload, Room, RoomId, SentAt, UserId,
};
use confab_transport::{
    ChatTransport, EventFeed, MessageEvent, PresenceEvent, PublishRequest,
    StatusCategory, StatusEvent, TransportError, TransportEvent,
};
use tokio::task::JoinHandle;

use crate::event::EventEmitter;
use crate::log::MessageLog;
use crate::presence;
use crate::{Operation, RoomConfig, RoomError, RoomEvent, RoomEvents};

/// State shared by every handle to one service.
pub(crate) struct Shared<T: ChatTransport, C: Codec> {
    pub(crate) room: Room,
    pub(crate) config: RoomConfig,
    pub(crate) transport: T,
    codec: C,
    log: RwLock<MessageLog>,
    occupants: RwLock<HashSet<UserId>>,
    /// One history request in flight per room. Tokio's mutex is FIFO, so
    /// queued fetches start in arrival order.
    pub(crate) history_gate: tokio::sync::Mutex<()>,
    emitter: EventEmitter,
}

/// Aggregated state of one chat room, reconciled from transport events
/// and local requests.
///
/// Cheap to clone; every clone is a handle to the same room. When the
/// last handle goes away the service unsubscribes from the room.
pub struct ChatRoomService<T: ChatTransport, C: Codec = JsonCodec> {
    pub(crate) shared: Arc<Shared<T, C>>,
}

impl<T: ChatTransport, C: Codec> Clone for ChatRoomService<T, C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: ChatTransport> ChatRoomService<T, JsonCodec> {
    /// Creates a service for `room` that decodes payloads as JSON.
    ///
    /// Returns the service and the single observer stream for its events.
    pub fn new(room: Room, config: RoomConfig, transport: T) -> (Self, RoomEvents) {
        Self::with_codec(room, config, transport, JsonCodec)
    }
}

impl<T: ChatTransport, C: Codec> ChatRoomService<T, C> {
    /// Creates a service with a custom payload codec.
    pub fn with_codec(
        room: Room,
        config: RoomConfig,
        transport: T,
        codec: C,
    ) -> (Self, RoomEvents) {
        let (emitter, events) = EventEmitter::channel();
        let shared = Shared {
            room,
            config: config.validated(),
            transport,
            codec,
            log: RwLock::new(MessageLog::default()),
            occupants: RwLock::new(HashSet::new()),
            history_gate: tokio::sync::Mutex::new(()),
            emitter,
        };
        tracing::debug!(room_id = %shared.room.id, "room service created");
        (
            Self {
                shared: Arc::new(shared),
            },
            events,
        )
    }

    // -- Snapshots --------------------------------------------------------

    /// The room this service is bound to.
    pub fn room(&self) -> &Room {
        &self.shared.room
    }

    /// The (validated) configuration.
    pub fn config(&self) -> &RoomConfig {
        &self.shared.config
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.shared.transport
    }

    /// The message log, sorted by `sent_at`.
    pub fn current_messages(&self) -> Vec<Message> {
        read(&self.shared.log).snapshot()
    }

    /// The current occupant ids.
    pub fn current_occupants(&self) -> HashSet<UserId> {
        read(&self.shared.occupants).clone()
    }

    /// Number of current occupants.
    pub fn occupancy(&self) -> usize {
        read(&self.shared.occupants).len()
    }

    /// Token of the newest message in the log.
    pub fn latest_sent_at(&self) -> Option<SentAt> {
        read(&self.shared.log).latest_sent_at()
    }

    /// Live subscription status, read from the transport on every call.
    pub fn connection_state(&self) -> ConnectionState {
        ConnectionState::from_subscribed(
            self.shared.transport.is_subscribed(&self.shared.room.id),
        )
    }

    /// The identity messages are sent as.
    pub fn sender_id(&self) -> UserId {
        self.shared.transport.current_sender_id()
    }

    // -- Lifecycle --------------------------------------------------------

    /// Subscribes to the room unless a subscription is already up.
    pub fn start(&self) {
        if self.is_shut_down() {
            tracing::debug!(room_id = %self.shared.room.id, "start after shutdown ignored");
            return;
        }
        if !self.shared.transport.is_subscribed(&self.shared.room.id) {
            tracing::info!(room_id = %self.shared.room.id, "subscribing");
            self.shared.transport.subscribe(&self.shared.room.id);
        }
    }

    /// Ends the subscription. In-flight history and presence requests are
    /// not cancelled; their results still land.
    pub fn stop(&self) {
        tracing::info!(room_id = %self.shared.room.id, "unsubscribing");
        self.shared.transport.unsubscribe(&self.shared.room.id);
    }

    /// Tears the service down: no further events are emitted, no further
    /// transport input mutates state, and the room is unsubscribed.
    pub fn shutdown(&self) {
        if self.shared.emitter.close() {
            tracing::info!(room_id = %self.shared.room.id, "room service shut down");
            self.shared.transport.unsubscribe(&self.shared.room.id);
        }
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shut_down(&self) -> bool {
        !self.shared.emitter.is_alive()
    }

    // -- Transport input --------------------------------------------------

    /// Spawns a task that feeds every transport event into this service.
    ///
    /// The task holds only a weak reference, so it never keeps the service
    /// alive; it exits when the feed closes or the service is gone.
    pub fn pump(&self, mut feed: EventFeed) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.shared);
        let room_id = self.shared.room.id.clone();
        tokio::spawn(async move {
            while let Some(event) = feed.recv().await {
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                ChatRoomService { shared }.ingest(event);
            }
            tracing::debug!(%room_id, "transport feed pump stopped");
        })
    }

    /// Takes the transport's event feed and [`pump`](Self::pump)s it.
    /// Returns `None` if the feed was already taken.
    pub fn attach(&self) -> Option<JoinHandle<()>> {
        self.shared
            .transport
            .take_event_feed()
            .map(|feed| self.pump(feed))
    }

    /// Routes one transport event to the matching ingest method.
    pub fn ingest(&self, event: TransportEvent) {
        match event {
            TransportEvent::Message(event) => self.ingest_message(event),
            TransportEvent::Presence(event) => self.ingest_presence(event),
            TransportEvent::Status(result) => self.ingest_status(result),
        }
    }

    /// Decodes and merges one incoming message.
    ///
    /// Undecodable payloads are logged and dropped. A message whose id is
    /// already in the log is ignored and produces no event.
    pub fn ingest_message(&self, event: MessageEvent) {
        if !self.accepts(&event.room_id) {
            return;
        }
        let decoded = self
            .shared
            .codec
            .decode::<PublishPayload>(&event.payload)
            .and_then(|payload| {
                payload.into_message(event.room_id.clone(), event.time_token)
            });
        match decoded {
            Ok(message) => self.merge(vec![message], false),
            Err(error) => {
                tracing::debug!(
                    room_id = %event.room_id,
                    %error,
                    "dropping undecodable message payload"
                );
            }
        }
    }

    /// Applies a live presence change and reports it.
    pub fn ingest_presence(&self, event: PresenceEvent) {
        if !self.accepts(&event.room_id) {
            return;
        }
        let mut occupants = write(&self.shared.occupants);
        let change = presence::apply_event(&mut occupants, event);
        tracing::debug!(
            room_id = %self.shared.room.id,
            joined = change.joined.len(),
            removed = change.removed.len(),
            occupancy = occupants.len(),
            "presence changed"
        );
        self.shared.emitter.emit(RoomEvent::Presence(Ok(change)));
    }

    /// Applies a connection status report.
    ///
    /// Connected/reconnected adds this client to the occupant set;
    /// disconnected clears it. Other categories are not forwarded.
    pub fn ingest_status(&self, result: Result<StatusEvent, TransportError>) {
        if self.is_shut_down() {
            tracing::debug!(room_id = %self.shared.room.id, "status after shutdown ignored");
            return;
        }
        let status = match result {
            Ok(status) => status,
            Err(error) => {
                tracing::warn!(room_id = %self.shared.room.id, %error, "transport status failure");
                self.shared.emitter.emit(RoomEvent::Status(Err(
                    RoomError::transport(Operation::Status, error),
                )));
                return;
            }
        };

        match status.response {
            StatusCategory::Connected | StatusCategory::Reconnected => {
                let mut occupants = write(&self.shared.occupants);
                occupants.insert(self.sender_id());
                tracing::info!(
                    room_id = %self.shared.room.id,
                    category = %status.response,
                    "connected"
                );
                self.shared
                    .emitter
                    .emit(RoomEvent::Status(Ok(ConnectionState::Connected)));
            }
            StatusCategory::Disconnected => {
                let mut occupants = write(&self.shared.occupants);
                occupants.clear();
                tracing::info!(room_id = %self.shared.room.id, "disconnected");
                self.shared
                    .emitter
                    .emit(RoomEvent::Status(Ok(ConnectionState::NotConnected)));
            }
            other => {
                tracing::debug!(
                    room_id = %self.shared.room.id,
                    category = %other,
                    request = ?status.request,
                    "status category not forwarded"
                );
            }
        }
    }

    // -- Local actions ----------------------------------------------------

    /// Publishes `text` as the current sender.
    ///
    /// The returned message is not added to the log; it shows up there
    /// once the transport echoes it back on the event feed.
    pub async fn send(
        &self,
        text: impl Into<String>,
    ) -> Result<Message, RoomError> {
        if self.is_shut_down() {
            return Err(RoomError::ShutDown(self.shared.room.id.clone()));
        }
        let message = Message::compose(
            text,
            self.sender_id(),
            self.shared.room.id.clone(),
        );
        let request = PublishRequest::new(
            self.shared.room.id.clone(),
            message.to_payload(),
        );

        match self.shared.transport.publish(request).await {
            Ok(receipt) => {
                tracing::debug!(
                    room_id = %self.shared.room.id,
                    message_id = %message.id,
                    time_token = %receipt.time_token,
                    "message published"
                );
                Ok(message)
            }
            Err(error) => {
                tracing::warn!(
                    room_id = %self.shared.room.id,
                    message_id = %message.id,
                    %error,
                    "publish failed"
                );
                Err(RoomError::transport(Operation::Send, error))
            }
        }
    }

    // -- Internals --------------------------------------------------------

    /// Merges a batch into the log and reports the newly added messages.
    ///
    /// With `always_report` an event is emitted even when nothing was new,
    /// so each history request produces exactly one report.
    pub(crate) fn merge(&self, batch: Vec<Message>, always_report: bool) {
        if self.is_shut_down() {
            tracing::debug!(
                room_id = %self.shared.room.id,
                count = batch.len(),
                "merge after shutdown ignored"
            );
            return;
        }
        let mut log = write(&self.shared.log);
        let offered = batch.len();
        let added = log.merge(batch);
        if added.is_empty() && !always_report {
            tracing::trace!(room_id = %self.shared.room.id, "duplicate message ignored");
            return;
        }
        tracing::debug!(
            room_id = %self.shared.room.id,
            offered,
            added = added.len(),
            total = log.len(),
            "messages merged"
        );
        self.shared.emitter.emit(RoomEvent::Messages(Ok(added)));
    }

    /// Snapshot-merges presence ids under the occupant write lock.
    pub(crate) fn absorb_snapshot(&self, uuids: Vec<UserId>) {
        if self.is_shut_down() {
            return;
        }
        let mut occupants = write(&self.shared.occupants);
        let joined = presence::absorb_snapshot(&mut occupants, uuids);
        tracing::debug!(
            room_id = %self.shared.room.id,
            joined = joined.len(),
            occupancy = occupants.len(),
            "presence snapshot merged"
        );
        self.shared
            .emitter
            .emit(RoomEvent::Presence(Ok(PresenceChange {
                joined,
                removed: Vec::new(),
            })));
    }

    pub(crate) fn emit(&self, event: RoomEvent) {
        self.shared.emitter.emit(event);
    }

    /// Transport input is accepted only for the owned room and only while
    /// the service is alive.
    fn accepts(&self, room_id: &RoomId) -> bool {
        if self.is_shut_down() {
            tracing::debug!(%room_id, "transport event after shutdown ignored");
            return false;
        }
        if *room_id != self.shared.room.id {
            tracing::debug!(
                %room_id,
                owned = %self.shared.room.id,
                "event for another room ignored"
            );
            return false;
        }
        true
    }
}

impl<T: ChatTransport, C: Codec> Drop for Shared<T, C> {
    fn drop(&mut self) {
        if self.transport.is_subscribed(&self.room.id) {
            tracing::info!(room_id = %self.room.id, "last handle dropped, unsubscribing");
            self.transport.unsubscribe(&self.room.id);
        }
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
