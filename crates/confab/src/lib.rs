//! # Confab
//!
//! Chat room state for pub/sub backends.
//!
//! Confab keeps the authoritative, deduplicated, time-ordered message log
//! and occupant set for one chat room, reconciles transport events with
//! local sends and fetches, and republishes one ordered event stream to
//! the application. The transport is abstract ([`ChatTransport`]); an
//! in-memory [`LocalHub`] ships for tests and demos.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use confab::prelude::*;
//!
//! # async fn run() -> Result<(), ConfabError> {
//! let hub = LocalHub::new();
//! let (client, mut events) = ChatClientBuilder::new().connect(hub.connect("alice"))?;
//! client.start()?;
//! client.send("hello").await?;
//! if let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod error;
mod lifecycle;

pub use client::{ChatClient, ChatClientBuilder};
pub use config::ClientConfig;
pub use error::ConfabError;
pub use lifecycle::{AppSignal, LifecycleController, LifecycleHandle};

pub use confab_protocol as protocol;
pub use confab_room as room;
pub use confab_transport as transport;

/// Installs a `tracing` subscriber that honours `RUST_LOG`, falling back
/// to `info`. Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// Common imports for applications.
pub mod prelude {
    pub use crate::{
        AppSignal, ChatClient, ChatClientBuilder, ClientConfig, ConfabError,
        LifecycleHandle, init_tracing,
    };
    pub use confab_protocol::{
        ConnectionState, Message, MessageId, PresenceChange, Room, RoomId,
        SentAt, User, UserId,
    };
    pub use confab_room::{
        ChatRoomService, Operation, RoomConfig, RoomError, RoomEvent,
        RoomEvents,
    };
    pub use confab_transport::ChatTransport;
    #[cfg(feature = "local")]
    pub use confab_transport::{LocalHub, LocalTransport};
}

#[cfg(feature = "local")]
pub use confab_transport::LocalHub;
pub use confab_transport::ChatTransport;
