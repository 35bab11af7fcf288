use thiserror::Error;

/// Errors that can occur in the hub and client sessions.
#[derive(Debug, Error)]
pub enum HubError {
    /// The hub loop has stopped.
    #[error("Hub is closed")]
    HubClosed,

    /// The hub's input queue is full and the event was not accepted.
    #[error("Hub queue is full")]
    QueueFull,

    /// The underlying connection failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Writing one frame took longer than the write deadline.
    #[error("Write timed out")]
    WriteTimeout,

    /// An event could not be encoded for the wire.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for hub operations.
pub type Result<T> = std::result::Result<T, HubError>;
