//! Error types for the protocol layer.
//!
//! A `ProtocolError` always means "these bytes are not what we expected".
//! The room service treats it as wire noise: the event is logged and
//! dropped, never surfaced to the observer.

/// Errors that can occur while encoding or decoding payloads.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust type into bytes).
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed (turning bytes into a Rust type).
    ///
    /// Common causes: malformed JSON, a missing `text` or `senderId`
    /// field, or a field of the wrong type.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The payload parsed but violates a protocol rule, e.g. an empty
    /// sender id.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}
