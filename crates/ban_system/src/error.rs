//! Error types for ban operations.

use persistence::StoreError;

/// Errors surfaced by the ban service.
///
/// RCON side effects never appear here: command failures are logged and the
/// database row remains the source of truth.
#[derive(Debug, thiserror::Error)]
pub enum BanError {
    /// Malformed input rejected before any write
    #[error("Validation error: {0}")]
    Validation(String),
    /// Backing store failure
    #[error(transparent)]
    Store(#[from] StoreError),
}
