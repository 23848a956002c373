//! Error taxonomy for the ingestion pipeline.
//!
//! Per-file and per-run failures are non-fatal: they are collected into
//! the pass report and the affected run is retried on the next pass.
//! Only catalog-registration failures and bootstrap problems abort a
//! pass.

/// Result type alias for ingestion operations.
pub type Result<T> = std::result::Result<T, IngestError>;

/// Per-file read failures.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    /// The file could not be fetched or decoded at the I/O level.
    #[error("unreadable file {path}: {source}")]
    UnreadableFile {
        /// The offending file.
        path: String,
        /// The underlying failure.
        #[source]
        source: strata_core::Error,
    },

    /// Declared keep columns are absent from the file.
    #[error("schema mismatch in {path}: missing columns {missing:?}")]
    SchemaMismatch {
        /// The offending file.
        path: String,
        /// The declared columns that were not found.
        missing: Vec<String>,
    },

    /// The file produced zero rows after projection.
    #[error("empty result from {path}")]
    EmptyResult {
        /// The offending file.
        path: String,
    },
}

impl ReadError {
    /// Returns the path of the file that failed.
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::UnreadableFile { path, .. }
            | Self::SchemaMismatch { path, .. }
            | Self::EmptyResult { path } => path,
        }
    }
}

/// Join execution failures; fatal for the join, not for the pass.
#[derive(Debug, thiserror::Error)]
pub enum JoinError {
    /// A join key is absent from a source's post-ingestion schema.
    #[error("join key '{column}' missing from collection {collection}")]
    MissingJoinKey {
        /// The collection whose schema lacks the key.
        collection: String,
        /// The missing key column.
        column: String,
    },

    /// A source collection has not completed any ingestion yet.
    #[error("collection {collection} has no ingested runs, cannot join")]
    SourceNotReady {
        /// The collection that is not ready.
        collection: String,
    },

    /// Reading or writing a table failed.
    #[error(transparent)]
    Store(#[from] strata_store::StoreError),
}

/// Pass-level ingestion errors.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// An underlying storage or coordination operation failed.
    #[error(transparent)]
    Core(#[from] strata_core::Error),

    /// A table store operation failed.
    #[error(transparent)]
    Store(#[from] strata_store::StoreError),

    /// Registering a catalog entry failed; this is pass-fatal because
    /// consumers would otherwise observe stale metadata indefinitely.
    #[error("catalog registration failed: {0}")]
    Registration(#[from] strata_catalog::CatalogError),
}
