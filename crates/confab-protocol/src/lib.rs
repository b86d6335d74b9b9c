//! Entity model for Confab.
//!
//! This crate defines the data that flows between a pub/sub transport and
//! the room service:
//!
//! - **Identity** ([`RoomId`], [`UserId`], [`MessageId`]): string
//!   newtypes so a room id can never be passed where a user id is wanted.
//! - **Entities** ([`Room`], [`User`], [`Message`]): plain data with the
//!   identity and ordering rules the room service relies on.
//! - **Payloads** ([`PublishPayload`]): what a client publishes and what
//!   comes back inside a message-received event.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how raw payload bytes
//!   become typed values.
//!
//! # Architecture
//!
//! ```text
//! Transport (raw payloads) → Protocol (Message, PresenceChange) → Room service
//! ```
//!
//! Nothing in here knows about locks, channels, or subscriptions.

mod codec;
mod error;
mod message;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use message::{Message, PublishPayload, SentAt};
pub use types::{
    ConnectionState, MessageId, PresenceChange, Room, RoomId, User, UserId,
};
