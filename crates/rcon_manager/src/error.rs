//! Error types for RCON operations.

use aegis_types::ServerId;

/// Errors surfaced by the RCON manager and its connections.
///
/// Command failures are reported to the caller only; connection failures
/// are retried by the reconnect supervisor until a permanent disconnect.
#[derive(Debug, thiserror::Error)]
pub enum RconError {
    /// No authenticated connection exists for the server
    #[error("Server {0} is not connected")]
    NotConnected(ServerId),
    /// The connection dropped while a request was in flight
    #[error("Connection closed while waiting for a response")]
    Disconnected,
    /// No response arrived within the execute deadline
    #[error("Timed out waiting for a response")]
    Timeout,
    /// The caller's context was canceled
    #[error("Request canceled")]
    Canceled,
    /// The server rejected the configured password
    #[error("Authentication rejected by server")]
    AuthFailed,
    /// A frame violated the wire protocol
    #[error("Protocol violation: {0}")]
    Protocol(String),
    /// Underlying socket failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RconError {
    /// True for failures the reconnect supervisor retries; false for fatal
    /// conditions such as rejected credentials.
    pub fn is_transient(&self) -> bool {
        !matches!(self, RconError::AuthFailed)
    }
}
