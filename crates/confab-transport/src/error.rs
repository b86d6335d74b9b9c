/// Errors reported by a pub/sub transport.
///
/// `Clone` because the same failure may be reported to the caller of an
/// operation and forwarded to the room's observer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The request never reached the backend (DNS, TLS, socket, ...).
    #[error("network error: {0}")]
    Network(String),

    /// The backend answered with an error status.
    #[error("request rejected ({status}): {reason}")]
    Rejected {
        /// Backend status code.
        status: u16,
        /// Backend-provided explanation.
        reason: String,
    },

    /// The backend did not answer in time.
    #[error("request timed out")]
    Timeout,

    /// The transport was shut down.
    #[error("transport shut down")]
    Shutdown,
}
