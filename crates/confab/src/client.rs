//! `ChatClient` builder: wires transport, room service and lifecycle
//! controller into one handle.
//!
//! ```text
//! transport feed ──► ChatRoomService ──► LifecycleController ──► RoomEvents (app)
//! ```

use std::collections::HashSet;

use confab_protocol::{
    Codec, ConnectionState, JsonCodec, Message, Room, UserId,
};
use confab_room::{ChatRoomService, RoomConfig, RoomEvents};
use confab_transport::ChatTransport;
use tokio::task::JoinHandle;

use crate::lifecycle::{AppSignal, LifecycleController, LifecycleHandle};
use crate::{ClientConfig, ConfabError};

/// Builder for a [`ChatClient`].
///
/// # Example
///
/// ```rust,no_run
/// use confab::prelude::*;
///
/// # async fn run() -> Result<(), ConfabError> {
/// let hub = LocalHub::new();
/// let (client, mut events) = ChatClientBuilder::new()
///     .room(Room::new("lobby", "Lobby"))
///     .connect(hub.connect("alice"))?;
/// client.start()?;
/// while let Some(event) = events.recv().await {
///     println!("{}", event.kind());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct ChatClientBuilder {
    config: ClientConfig,
}

impl ChatClientBuilder {
    /// Creates a builder for the default demo room.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the room to join.
    pub fn room(mut self, room: Room) -> Self {
        self.config.room = room;
        self
    }

    /// Sets the room options.
    pub fn room_config(mut self, room_config: RoomConfig) -> Self {
        self.config.room_config = room_config;
        self
    }

    /// Builds the client over `transport`, decoding payloads as JSON.
    ///
    /// Must be called inside a Tokio runtime. Nothing is subscribed yet;
    /// call [`ChatClient::start`] or signal
    /// [`AppSignal::BecameActive`].
    pub fn connect<T: ChatTransport>(
        self,
        transport: T,
    ) -> Result<(ChatClient<T>, RoomEvents), ConfabError> {
        self.connect_with_codec(transport, JsonCodec)
    }

    /// Builds the client with a custom payload codec.
    ///
    /// The transport must publish payloads in the same format, e.g.
    /// `hub.connect_with_codec(sender, codec.clone())` for a `LocalHub`.
    /// Payloads that fail to decode are dropped.
    pub fn connect_with_codec<T: ChatTransport, C: Codec>(
        self,
        transport: T,
        codec: C,
    ) -> Result<(ChatClient<T, C>, RoomEvents), ConfabError> {
        let room_id = self.config.room.id.clone();
        let (service, events) = ChatRoomService::with_codec(
            self.config.room,
            self.config.room_config,
            transport,
            codec,
        );
        let pump = service
            .attach()
            .ok_or(ConfabError::FeedUnavailable(room_id))?;
        let (lifecycle, events, controller) =
            LifecycleController::spawn(service.clone(), events);

        tracing::info!(
            room_id = %service.room().id,
            sender_id = %service.sender_id(),
            "chat client ready"
        );
        Ok((
            ChatClient {
                service,
                lifecycle,
                pump,
                controller,
            },
            events,
        ))
    }
}

/// A connected chat client for one room.
///
/// Reads go straight to the room service; lifecycle requests go through
/// the controller so they are ordered with the event stream.
pub struct ChatClient<T: ChatTransport, C: Codec = JsonCodec> {
    service: ChatRoomService<T, C>,
    lifecycle: LifecycleHandle,
    pump: JoinHandle<()>,
    controller: JoinHandle<()>,
}

impl<T: ChatTransport, C: Codec> ChatClient<T, C> {
    /// The underlying room service.
    pub fn service(&self) -> &ChatRoomService<T, C> {
        &self.service
    }

    /// A handle for forwarding app-activity signals from elsewhere.
    pub fn lifecycle(&self) -> &LifecycleHandle {
        &self.lifecycle
    }

    /// The room this client is in.
    pub fn room(&self) -> &Room {
        self.service.room()
    }

    /// Subscribes to the room, or catches up if already subscribed.
    pub fn start(&self) -> Result<(), ConfabError> {
        self.signal(AppSignal::BecameActive)
    }

    /// Unsubscribes from the room. The client can be started again.
    pub fn stop(&self) -> Result<(), ConfabError> {
        self.signal(AppSignal::WillResignActive)
    }

    /// Forwards an app-activity signal to the lifecycle controller.
    pub fn signal(&self, signal: AppSignal) -> Result<(), ConfabError> {
        self.lifecycle.signal(signal)
    }

    /// Publishes `text`. The message joins the log once it is echoed back.
    pub async fn send(
        &self,
        text: impl Into<String>,
    ) -> Result<Message, ConfabError> {
        Ok(self.service.send(text).await?)
    }

    /// Snapshot of the message log, oldest first.
    pub fn messages(&self) -> Vec<Message> {
        self.service.current_messages()
    }

    /// Snapshot of the occupant set.
    pub fn occupants(&self) -> HashSet<UserId> {
        self.service.current_occupants()
    }

    /// Whether the transport currently holds a subscription.
    pub fn connection_state(&self) -> ConnectionState {
        self.service.connection_state()
    }

    /// Shuts the service down, stops the controller and the feed pump.
    pub async fn shutdown(self) -> Result<(), ConfabError> {
        let room_id = self.service.room().id.clone();
        let result = self.lifecycle.shutdown().await;
        self.pump.abort();
        if self.controller.await.is_err() {
            tracing::warn!(%room_id, "lifecycle controller task panicked");
        }
        tracing::info!(%room_id, "chat client shut down");
        result
    }
}
