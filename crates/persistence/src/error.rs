//! Store error taxonomy.

/// Errors surfaced by the relational and columnar stores.
///
/// `NotFound`, `Conflict` and `Validation` are caller errors and never
/// retried; `Upstream` covers transient backend failures that read paths may
/// answer with a degraded fallback.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The referenced row does not exist
    #[error("Not found: {0}")]
    NotFound(String),
    /// A uniqueness or subscription constraint was violated
    #[error("Conflict: {0}")]
    Conflict(String),
    /// The write was rejected before reaching the backend
    #[error("Validation error: {0}")]
    Validation(String),
    /// Backend failure (connection, transaction, query)
    #[error("Database error: {0}")]
    Upstream(#[from] sqlx::Error),
    /// Row content that cannot be decoded into the model
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}
