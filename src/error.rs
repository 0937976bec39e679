//! Error types for the reminder engine.

/// Top-level error type for the notification-scheduling engine.
#[derive(Debug, thiserror::Error)]
pub enum GarageLogError {
    /// Notification or obligation store error.
    #[error("store error: {0}")]
    Store(String),

    /// Configuration lookup or parse error.
    #[error("config error: {0}")]
    Config(String),

    /// Invalid schedule expression or timer setup error.
    #[error("schedule error: {0}")]
    Schedule(String),

    /// Invalid obligation data (e.g. recurrence end before anchor date).
    #[error("obligation error: {0}")]
    Obligation(String),

    /// Digest delivery failure reported by the delivery channel.
    #[error("delivery error: {0}")]
    Delivery(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, GarageLogError>;
