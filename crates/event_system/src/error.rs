//! Error types for the event system.

use uuid::Uuid;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// The subscriber id is not (or no longer) registered
    #[error("Unknown subscriber: {0}")]
    UnknownSubscriber(Uuid),
    /// Payload serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
