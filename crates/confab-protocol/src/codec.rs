//! Codec trait and implementations for payload bytes.
//!
//! Transports hand the room service raw payload bytes for every
//! message-received event. The service does not care how those bytes were
//! produced, only that something implementing [`Codec`] can turn them
//! into a [`PublishPayload`](crate::PublishPayload). Swapping JSON for a
//! binary format means adding a codec, not touching the service.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// Encodes Rust values to bytes and decodes bytes back.
///
/// `Send + Sync + 'static` because a codec lives inside the room service,
/// which is shared across Tokio tasks for the life of the process.
///
/// `decode` asks for `DeserializeOwned` rather than `Deserialize<'de>`:
/// the decoded value must not borrow from the input buffer, which the
/// transport is free to drop as soon as the call returns.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed,
    /// incomplete, or don't match the expected type.
    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// JSON is what pub/sub backends typically carry for chat payloads, and
/// it keeps payloads readable in logs. Behind the `json` feature
/// (enabled by default).
///
/// ## Example
///
/// ```rust
/// use confab_protocol::{Codec, JsonCodec, MessageId, PublishPayload, UserId};
///
/// let codec = JsonCodec;
///
/// let payload = PublishPayload {
///     sender_id: UserId::from("user-1"),
///     text: "hello".into(),
///     uuid: Some(MessageId::from("m-1")),
/// };
///
/// let bytes = codec.encode(&payload).unwrap();
/// let decoded: PublishPayload = codec.decode(&bytes).unwrap();
/// assert_eq!(payload, decoded);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
