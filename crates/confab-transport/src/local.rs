//! In-memory pub/sub backend.
//!
//! A [`LocalHub`] plays the role of the hosted service: it keeps each
//! room's history and knows which clients are subscribed where. Every
//! [`LocalTransport`] connected to the hub is one client with its own
//! sender identity and its own event feed.
//!
//! Presence is derived from subscriptions, so "who is here" is always
//! consistent with "who is subscribed".

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use confab_protocol::{
    Codec, JsonCodec, Message, MessageId, RoomId, SentAt, UserId,
};
use tokio::sync::mpsc;

use crate::{
    ChatTransport, EventFeed, EventSink, HistoryPage, HistoryRequest,
    MessageEvent, PresenceEvent, PresenceSnapshot, PublishReceipt,
    PublishRequest, RequestCategory, StatusCategory, StatusEvent,
    TransportError, TransportEvent,
};

/// Counter for generating unique client IDs.
static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier for a client connected to a [`LocalHub`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

impl ClientId {
    fn next() -> Self {
        Self(NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Hub
// ---------------------------------------------------------------------------

/// Shared in-memory backend. Cheap to clone; all clones are one hub.
#[derive(Clone, Default)]
pub struct LocalHub {
    state: Arc<Mutex<HubState>>,
}

#[derive(Default)]
struct HubState {
    rooms: HashMap<RoomId, RoomLog>,
    clients: HashMap<ClientId, ClientEntry>,
}

#[derive(Default)]
struct RoomLog {
    history: Vec<Message>,
    last_token: SentAt,
}

struct ClientEntry {
    sender: UserId,
    rooms: HashSet<RoomId>,
    sink: EventSink,
}

impl LocalHub {
    /// Creates an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Connects a new client publishing as `sender`, with JSON payloads.
    pub fn connect(&self, sender: impl Into<UserId>) -> LocalTransport {
        self.connect_with_codec(sender, JsonCodec)
    }

    /// Connects a new client that encodes published payloads with `codec`.
    ///
    /// Payload bytes are relayed as-is, so every client on a hub must use
    /// the same codec, and the room service reading this transport must
    /// decode with it too.
    pub fn connect_with_codec<C: Codec>(
        &self,
        sender: impl Into<UserId>,
        codec: C,
    ) -> LocalTransport<C> {
        let (sink, feed) = mpsc::unbounded_channel();
        let id = ClientId::next();
        let sender = sender.into();
        self.lock().clients.insert(
            id,
            ClientEntry {
                sender: sender.clone(),
                rooms: HashSet::new(),
                sink,
            },
        );
        tracing::debug!(%id, %sender, "local client connected");
        LocalTransport {
            id,
            sender,
            hub: self.clone(),
            feed: Mutex::new(Some(feed)),
            codec,
        }
    }

    /// Stores a message in a room's history without delivering it live.
    pub fn seed(&self, message: Message) {
        let mut state = self.lock();
        let log = state.rooms.entry(message.room_id.clone()).or_default();
        log.last_token = log.last_token.max(message.sent_at);
        log.history.push(message);
        log.history.sort_by_key(|m| m.sent_at);
    }

    /// Number of stored messages in a room.
    pub fn history_len(&self, room_id: &RoomId) -> usize {
        self.lock().rooms.get(room_id).map_or(0, |log| log.history.len())
    }

    /// Users currently subscribed to a room.
    pub fn occupants(&self, room_id: &RoomId) -> Vec<UserId> {
        self.lock().occupants(room_id).into_iter().collect()
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl HubState {
    fn occupants(&self, room_id: &RoomId) -> BTreeSet<UserId> {
        self.clients
            .values()
            .filter(|c| c.rooms.contains(room_id))
            .map(|c| c.sender.clone())
            .collect()
    }

    /// Sends an event to every client subscribed to `room_id`. Clients
    /// whose feed was dropped are skipped.
    fn broadcast(&self, room_id: &RoomId, event: &TransportEvent) {
        for client in self.clients.values() {
            if client.rooms.contains(room_id) {
                let _ = client.sink.send(event.clone());
            }
        }
    }

    fn send_status(
        &self,
        id: ClientId,
        response: StatusCategory,
        request: RequestCategory,
    ) {
        if let Some(client) = self.clients.get(&id) {
            let _ = client
                .sink
                .send(TransportEvent::Status(Ok(StatusEvent::new(
                    response, request,
                ))));
        }
    }

    /// Removes `id` from `room_id` and tells the remaining subscribers.
    /// `timed_out` picks which presence list the departure lands in.
    fn remove_from_room(
        &mut self,
        id: ClientId,
        room_id: &RoomId,
        timed_out: bool,
    ) -> bool {
        let Some(client) = self.clients.get_mut(&id) else {
            return false;
        };
        if !client.rooms.remove(room_id) {
            return false;
        }
        let sender = client.sender.clone();
        let occupants = self.occupants(room_id);
        if !occupants.contains(&sender) {
            let mut event = PresenceEvent {
                room_id: room_id.clone(),
                occupancy: occupants.len(),
                ..PresenceEvent::default()
            };
            if timed_out {
                event.timedout.push(sender);
            } else {
                event.left.push(sender);
            }
            self.broadcast(room_id, &TransportEvent::Presence(event));
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// One client of a [`LocalHub`]. Implements [`ChatTransport`].
///
/// Dropping the transport disconnects the client and announces its
/// departure from every room it was subscribed to.
pub struct LocalTransport<C: Codec = JsonCodec> {
    id: ClientId,
    sender: UserId,
    hub: LocalHub,
    feed: Mutex<Option<EventFeed>>,
    codec: C,
}

impl<C: Codec> LocalTransport<C> {
    /// This client's hub-assigned id.
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Drops every subscription as if the network went away: remaining
    /// subscribers see a timeout, this client sees `Disconnected`.
    pub fn simulate_disconnect(&self) {
        let mut state = self.hub.lock();
        let rooms: Vec<RoomId> = state
            .clients
            .get(&self.id)
            .map(|c| c.rooms.iter().cloned().collect())
            .unwrap_or_default();
        for room_id in &rooms {
            state.remove_from_room(self.id, room_id, true);
        }
        state.send_status(
            self.id,
            StatusCategory::Disconnected,
            RequestCategory::Subscribe,
        );
        tracing::debug!(id = %self.id, rooms = rooms.len(), "simulated disconnect");
    }

    /// Pushes an arbitrary event onto this client's feed. Lets tests feed
    /// malformed or foreign-room traffic through the real pipeline.
    pub fn inject(&self, event: TransportEvent) {
        if let Some(client) = self.hub.lock().clients.get(&self.id) {
            let _ = client.sink.send(event);
        }
    }
}

impl<C: Codec> ChatTransport for LocalTransport<C> {
    fn subscribe(&self, room_id: &RoomId) {
        let mut state = self.hub.lock();
        let Some(client) = state.clients.get_mut(&self.id) else {
            return;
        };
        if !client.rooms.insert(room_id.clone()) {
            return;
        }
        let sender = client.sender.clone();
        state.rooms.entry(room_id.clone()).or_default();

        state.send_status(
            self.id,
            StatusCategory::Connected,
            RequestCategory::Subscribe,
        );
        let occupancy = state.occupants(room_id).len();
        state.broadcast(
            room_id,
            &TransportEvent::Presence(PresenceEvent {
                room_id: room_id.clone(),
                joined: vec![sender],
                occupancy,
                ..PresenceEvent::default()
            }),
        );
        tracing::debug!(id = %self.id, %room_id, "subscribed");
    }

    fn unsubscribe(&self, room_id: &RoomId) {
        let mut state = self.hub.lock();
        if state.remove_from_room(self.id, room_id, false) {
            state.send_status(
                self.id,
                StatusCategory::Disconnected,
                RequestCategory::Unsubscribe,
            );
            tracing::debug!(id = %self.id, %room_id, "unsubscribed");
        }
    }

    fn is_subscribed(&self, room_id: &RoomId) -> bool {
        self.hub
            .lock()
            .clients
            .get(&self.id)
            .is_some_and(|c| c.rooms.contains(room_id))
    }

    fn current_sender_id(&self) -> UserId {
        self.sender.clone()
    }

    async fn publish(
        &self,
        request: PublishRequest,
    ) -> Result<PublishReceipt, TransportError> {
        let mut payload = request.payload;
        let id = payload.uuid.get_or_insert_with(MessageId::generate).clone();
        let bytes = self.codec.encode(&payload).map_err(|e| {
            TransportError::Rejected {
                status: 400,
                reason: e.to_string(),
            }
        })?;

        let mut state = self.hub.lock();
        let log = state.rooms.entry(request.room_id.clone()).or_default();
        let now = SentAt::now();
        let token = if now > log.last_token {
            now
        } else {
            SentAt(log.last_token.0 + 1)
        };
        log.last_token = token;
        if request.store_in_history {
            log.history.push(Message {
                id,
                text: payload.text,
                sent_at: token,
                sender_id: payload.sender_id,
                room_id: request.room_id.clone(),
            });
        }

        state.broadcast(
            &request.room_id,
            &TransportEvent::Message(MessageEvent {
                room_id: request.room_id.clone(),
                payload: bytes,
                time_token: token,
            }),
        );

        Ok(PublishReceipt {
            time_token: token,
            info: "Sent".to_owned(),
        })
    }

    async fn fetch_history(
        &self,
        request: HistoryRequest,
    ) -> Result<Option<HistoryPage>, TransportError> {
        let state = self.hub.lock();
        let Some(log) = state.rooms.get(&request.room_id) else {
            return Ok(None);
        };

        let messages: Vec<Message> = match request.start {
            None => tail(&log.history, request.limit),
            Some(start) if request.reverse => log
                .history
                .iter()
                .filter(|m| m.sent_at > start)
                .take(request.limit)
                .cloned()
                .collect(),
            Some(start) => {
                let older: Vec<Message> = log
                    .history
                    .iter()
                    .filter(|m| m.sent_at < start)
                    .cloned()
                    .collect();
                tail(&older, request.limit)
            }
        };

        Ok(Some(HistoryPage {
            start: messages.first().map(|m| m.sent_at).unwrap_or_default(),
            end: messages.last().map(|m| m.sent_at).unwrap_or_default(),
            messages,
        }))
    }

    async fn fetch_presence(
        &self,
        room_id: RoomId,
    ) -> Result<Option<PresenceSnapshot>, TransportError> {
        let uuids: Vec<UserId> =
            self.hub.lock().occupants(&room_id).into_iter().collect();
        Ok(Some(PresenceSnapshot {
            occupancy: uuids.len(),
            uuids,
        }))
    }

    fn take_event_feed(&self) -> Option<EventFeed> {
        self.feed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl<C: Codec> Drop for LocalTransport<C> {
    fn drop(&mut self) {
        let mut state = self.hub.lock();
        let rooms: Vec<RoomId> = state
            .clients
            .get(&self.id)
            .map(|c| c.rooms.iter().cloned().collect())
            .unwrap_or_default();
        for room_id in &rooms {
            state.remove_from_room(self.id, room_id, false);
        }
        state.clients.remove(&self.id);
    }
}

/// The last `limit` messages, in chronological order.
fn tail(messages: &[Message], limit: usize) -> Vec<Message> {
    let skip = messages.len().saturating_sub(limit);
    messages[skip..].to_vec()
}
