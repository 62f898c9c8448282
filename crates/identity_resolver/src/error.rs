//! Error types for identity resolution.

use persistence::{IdentifierKind, StoreError};

/// Errors surfaced by the identity resolver.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// No observation has ever referenced the probe identifier
    #[error("Unknown identity: {kind:?} {value}")]
    Unknown {
        kind: IdentifierKind,
        value: String,
    },
    /// The probe was not a well-formed identifier of its kind
    #[error("Malformed probe identifier: {0}")]
    MalformedProbe(String),
    /// Backing store failure that had no pending-mode fallback
    #[error(transparent)]
    Store(#[from] StoreError),
}
