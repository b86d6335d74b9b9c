//! Observer-facing events and the single ordered path that delivers them.
//!
//! Every event the service produces goes through one [`EventEmitter`]
//! into one unbounded channel. The observer owns the receiving end
//! ([`RoomEvents`]) and drains it in order, so it never sees two events at
//! once and never sees them out of the order they were generated.

use std::sync::atomic::{AtomicBool, Ordering};

use confab_protocol::{ConnectionState, Message, PresenceChange};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::RoomError;

/// What the service tells its observer.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    /// Newly merged messages (only the new ones, never the whole log), or
    /// a failed history fetch.
    Messages(Result<Vec<Message>, RoomError>),
    /// An occupant-set delta, or a failed presence fetch.
    Presence(Result<PresenceChange, RoomError>),
    /// A connection state change, or a transport status failure.
    Status(Result<ConnectionState, RoomError>),
}

impl RoomEvent {
    /// Short category name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Messages(_) => "messages",
            Self::Presence(_) => "presence",
            Self::Status(_) => "status",
        }
    }
}

/// Sending side of the observer channel, plus the liveness flag.
///
/// Once closed, every further `emit` is dropped. Callers emit while still
/// holding the write lock of the state they just changed; that is what
/// keeps per-category delivery order equal to application order.
pub(crate) struct EventEmitter {
    tx: mpsc::UnboundedSender<RoomEvent>,
    alive: AtomicBool,
}

impl EventEmitter {
    pub(crate) fn channel() -> (Self, RoomEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        let emitter = Self {
            tx,
            alive: AtomicBool::new(true),
        };
        (emitter, RoomEvents { rx })
    }

    pub(crate) fn emit(&self, event: RoomEvent) {
        if !self.is_alive() {
            tracing::trace!(kind = event.kind(), "service shut down, event dropped");
            return;
        }
        let kind = event.kind();
        if self.tx.send(event).is_err() {
            tracing::trace!(kind, "observer gone, event dropped");
        }
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Turns emission off. Returns `true` if this call did it.
    pub(crate) fn close(&self) -> bool {
        self.alive.swap(false, Ordering::AcqRel)
    }
}

/// Receiving side of the observer channel. There is exactly one per
/// service, handed out by the constructor.
#[derive(Debug)]
pub struct RoomEvents {
    rx: mpsc::UnboundedReceiver<RoomEvent>,
}

impl From<mpsc::UnboundedReceiver<RoomEvent>> for RoomEvents {
    /// Wraps a relay channel, for layers that re-emit a service's events.
    fn from(rx: mpsc::UnboundedReceiver<RoomEvent>) -> Self {
        Self { rx }
    }
}

impl RoomEvents {
    /// Waits for the next event. Returns `None` once every service handle
    /// is gone and the buffer is drained.
    pub async fn recv(&mut self) -> Option<RoomEvent> {
        self.rx.recv().await
    }

    /// Returns the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<RoomEvent> {
        self.rx.try_recv().ok()
    }

    /// Spawns a task that hands every event to `listener`, one at a time
    /// and in order. The listener does not need to be reentrant.
    pub fn listen<F>(mut self, mut listener: F) -> JoinHandle<()>
    where
        F: FnMut(RoomEvent) + Send + 'static,
    {
        tokio::spawn(async move {
            while let Some(event) = self.rx.recv().await {
                tracing::trace!(kind = event.kind(), "delivering event");
                listener(event);
            }
        })
    }
}
