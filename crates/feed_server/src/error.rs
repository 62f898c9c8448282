//! Error types for the feed server.

/// Errors surfaced while serving feeds.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// Listener bind or socket failure
    #[error("Network error: {0}")]
    Io(#[from] std::io::Error),
    /// WebSocket protocol failure
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}
