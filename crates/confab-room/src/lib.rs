//! Room state aggregation for Confab.
//!
//! A [`ChatRoomService`] sits between a pub/sub transport and a UI layer.
//! It owns the deduplicated, time-ordered message log and the occupant
//! set for exactly one room, reconciles transport events with local
//! requests, and republishes one consistent event stream to a single
//! observer.
//!
//! # Key types
//!
//! - [`ChatRoomService`]: the aggregator; also issues history and presence
//!   requests and publishes messages
//! - [`RoomEvents`]: the observer's ordered event stream
//! - [`RoomEvent`]: messages, presence or status, each result-typed
//! - [`RoomConfig`]: page size and history options
//! - [`RoomError`]: transport failures tagged with their [`Operation`]
//!
//! # Data flow
//!
//! ```text
//! transport feed ──► ingest_* ──► log / occupants ──► EventEmitter ──► RoomEvents
//! send / fetch_* ──► ChatTransport ──► (echo on the feed)
//! ```

mod config;
mod error;
mod event;
mod log;
mod presence;
mod requests;
mod service;

pub use config::RoomConfig;
pub use error::{Operation, RoomError};
pub use event::{RoomEvent, RoomEvents};
pub use service::ChatRoomService;
