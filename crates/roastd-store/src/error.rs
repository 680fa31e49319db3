//! Error types for `roastd-store`.

/// Errors from the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The database rejected the operation.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A persisted row could not be decoded back into its domain type.
    #[error("corrupt row: {reason}")]
    Corrupt { reason: String },

    /// The requested record does not exist.
    #[error("{what} not found")]
    NotFound { what: String },

    /// Bad store configuration (dialect, URL).
    #[error("store configuration error: {reason}")]
    Config { reason: String },
}

impl From<StoreError> for roastd_core::QueueError {
    fn from(err: StoreError) -> Self {
        Self::Backend {
            reason: err.to_string(),
        }
    }
}

impl From<StoreError> for roastd_core::SinkError {
    fn from(err: StoreError) -> Self {
        Self::Backend {
            reason: err.to_string(),
        }
    }
}
