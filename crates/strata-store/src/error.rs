//! Error types for store operations.

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during table store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// An underlying storage operation failed.
    #[error(transparent)]
    Core(#[from] strata_core::Error),

    /// A stored document could not be decoded.
    #[error("corrupt object at {key}: {message}")]
    Corrupt {
        /// The storage key of the offending object.
        key: String,
        /// Description of the decode failure.
        message: String,
    },

    /// A CAS commit kept conflicting past the retry budget.
    ///
    /// The run is rolled back whole: its segment is unreferenced and
    /// will be collected by vacuum, and a later pass retries the run.
    #[error("commit for {collection} conflicted {attempts} times, giving up")]
    CasExhausted {
        /// The collection whose manifest kept moving.
        collection: String,
        /// How many attempts were made.
        attempts: u32,
    },
}
