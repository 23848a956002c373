//! Error types for catalog operations.

/// Result type alias for catalog operations.
pub type Result<T> = std::result::Result<T, CatalogError>;

/// Errors that can occur during catalog operations.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// An underlying storage operation failed.
    #[error(transparent)]
    Core(#[from] strata_core::Error),

    /// A stored catalog document could not be decoded.
    #[error("corrupt catalog document at {key}: {message}")]
    Corrupt {
        /// The storage key of the offending document.
        key: String,
        /// Description of the decode failure.
        message: String,
    },

    /// An upsert kept conflicting past the retry budget.
    #[error("catalog upsert for {entry} conflicted {attempts} times, giving up")]
    UpsertConflict {
        /// The entry whose document kept moving.
        entry: String,
        /// How many attempts were made.
        attempts: u32,
    },

    /// The catalog never reached the initialized state in time.
    #[error("catalog not initialized after {waited_secs}s")]
    NotInitialized {
        /// How long the caller waited.
        waited_secs: u64,
    },
}
