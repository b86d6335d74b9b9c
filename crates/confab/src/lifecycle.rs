//! Lifecycle controller: an actor task that drives subscription state.
//!
//! The controller sits between a [`ChatRoomService`] and the application.
//! It consumes two independent inputs, app-activity signals from the host
//! and the service's own event stream, and turns them into subscribe,
//! unsubscribe and catch-up requests. Every service event is forwarded
//! downstream unchanged and in order, so the application still has a
//! single observer stream.
//!
//! ```text
//! AppSignal ──► LifecycleHandle ──► ┐
//!                                   ├─► controller task ──► downstream RoomEvents
//! ChatRoomService ──► RoomEvents ──► ┘        │
//!                                             └─► start / stop / refresh
//! ```

use std::fmt;

use confab_protocol::{Codec, ConnectionState, RoomId};
use confab_room::{ChatRoomService, RoomEvent, RoomEvents};
use confab_transport::ChatTransport;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::ConfabError;

/// Host application activity, as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppSignal {
    /// The app came to the foreground and is interactive.
    BecameActive,
    /// The app is about to stop being interactive.
    WillResignActive,
    /// The app moved to the background. Not acted on.
    EnteredBackground,
    /// The app is about to return to the foreground. Not acted on.
    WillEnterForeground,
}

impl fmt::Display for AppSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BecameActive => write!(f, "became-active"),
            Self::WillResignActive => write!(f, "will-resign-active"),
            Self::EnteredBackground => write!(f, "entered-background"),
            Self::WillEnterForeground => write!(f, "will-enter-foreground"),
        }
    }
}

/// Commands sent to the controller through its channel.
enum Command {
    Signal(AppSignal),
    Shutdown { reply: oneshot::Sender<()> },
}

/// Handle to a running controller. Cheap to clone.
///
/// Dropping every handle stops the controller and shuts the service down.
#[derive(Clone)]
pub struct LifecycleHandle {
    room_id: RoomId,
    sender: mpsc::UnboundedSender<Command>,
}

impl LifecycleHandle {
    /// The room the controlled service is bound to.
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Delivers an app-activity signal (fire-and-forget).
    pub fn signal(&self, signal: AppSignal) -> Result<(), ConfabError> {
        self.sender
            .send(Command::Signal(signal))
            .map_err(|_| ConfabError::ControllerStopped(self.room_id.clone()))
    }

    /// Stops the controller, shuts the service down and unsubscribes.
    ///
    /// Resolves once the controller has processed the request. Events the
    /// service produced before this call are forwarded first.
    pub async fn shutdown(&self) -> Result<(), ConfabError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(Command::Shutdown { reply: reply_tx })
            .map_err(|_| ConfabError::ControllerStopped(self.room_id.clone()))?;
        reply_rx
            .await
            .map_err(|_| ConfabError::ControllerStopped(self.room_id.clone()))
    }

    /// Whether the controller task is still accepting commands.
    pub fn is_running(&self) -> bool {
        !self.sender.is_closed()
    }
}

/// The controller actor. Runs inside its own Tokio task.
pub struct LifecycleController<T: ChatTransport, C: Codec> {
    service: ChatRoomService<T, C>,
    events: RoomEvents,
    commands: mpsc::UnboundedReceiver<Command>,
    downstream: mpsc::UnboundedSender<RoomEvent>,
    /// Last connection state seen on the event stream. Catch-up fetches
    /// fire only when this flips to `Connected`.
    state: ConnectionState,
}

impl<T: ChatTransport, C: Codec> LifecycleController<T, C> {
    /// Spawns a controller over `service`, consuming its event stream.
    ///
    /// Returns the control handle, the downstream event stream the
    /// application should observe instead, and the task handle.
    pub fn spawn(
        service: ChatRoomService<T, C>,
        events: RoomEvents,
    ) -> (LifecycleHandle, RoomEvents, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (down_tx, down_rx) = mpsc::unbounded_channel();
        let room_id = service.room().id.clone();

        let controller = Self {
            service,
            events,
            commands: cmd_rx,
            downstream: down_tx,
            state: ConnectionState::NotConnected,
        };
        let task = tokio::spawn(controller.run());

        let handle = LifecycleHandle {
            room_id,
            sender: cmd_tx,
        };
        (handle, RoomEvents::from(down_rx), task)
    }

    /// Runs the actor loop until shutdown or until every handle is gone.
    async fn run(mut self) {
        let room_id = self.service.room().id.clone();
        tracing::info!(%room_id, "lifecycle controller started");

        loop {
            tokio::select! {
                // Forward what the service already produced before acting
                // on a new command.
                biased;

                Some(event) = self.events.recv() => {
                    self.handle_event(event);
                }
                command = self.commands.recv() => match command {
                    Some(Command::Signal(signal)) => self.handle_signal(signal),
                    Some(Command::Shutdown { reply }) => {
                        self.service.shutdown();
                        let _ = reply.send(());
                        break;
                    }
                    None => {
                        tracing::debug!(%room_id, "all lifecycle handles dropped");
                        self.service.shutdown();
                        break;
                    }
                },
            }
        }

        tracing::info!(%room_id, "lifecycle controller stopped");
    }

    fn handle_event(&mut self, event: RoomEvent) {
        if let RoomEvent::Status(Ok(next)) = &event {
            let previous = std::mem::replace(&mut self.state, *next);
            if previous != ConnectionState::Connected
                && *next == ConnectionState::Connected
            {
                tracing::debug!(
                    room_id = %self.service.room().id,
                    "connected, catching up"
                );
                self.spawn_refresh();
            }
        }

        tracing::trace!(kind = event.kind(), "forwarding event");
        if self.downstream.send(event).is_err() {
            tracing::trace!(
                room_id = %self.service.room().id,
                "downstream observer gone"
            );
        }
    }

    fn handle_signal(&self, signal: AppSignal) {
        let room_id = &self.service.room().id;
        match signal {
            AppSignal::BecameActive => {
                if self.service.connection_state().is_connected() {
                    tracing::debug!(%room_id, %signal, "already connected, catching up");
                    self.spawn_refresh();
                } else {
                    tracing::info!(%room_id, %signal, "starting subscription");
                    self.service.start();
                }
            }
            AppSignal::WillResignActive => {
                tracing::info!(%room_id, %signal, "stopping subscription");
                self.service.stop();
            }
            AppSignal::EnteredBackground | AppSignal::WillEnterForeground => {
                tracing::trace!(%room_id, %signal, "app signal ignored");
            }
        }
    }

    /// History and presence results come back through the event stream,
    /// so the fetch runs on its own task and never stalls the loop.
    fn spawn_refresh(&self) {
        let service = self.service.clone();
        tokio::spawn(async move { service.refresh().await });
    }
}
