//! Pluggable format readers.
//!
//! A reader normalizes one discovered file into rows of the common
//! tabular value model. Readers are per-file and fallible per-file:
//! every error they produce is collected into the pass report without
//! aborting the batch.

use async_trait::async_trait;

use strata_config::{CollectionConfig, CollectionKind};
use strata_core::StorageBackend;
use strata_store::Row;

use crate::error::ReadError;

mod jbrowse;
mod tabular;

pub use jbrowse::JBrowseReader;
pub use tabular::TabularReader;

/// Reads one file into rows of the common tabular representation.
#[async_trait]
pub trait FormatReader: Send + Sync {
    /// Reads and normalizes the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns a [`ReadError`] scoped to this file; the caller decides
    /// how the failure affects the surrounding run.
    async fn read(&self, source: &dyn StorageBackend, path: &str) -> Result<Vec<Row>, ReadError>;
}

/// Builds the reader for a collection from its configuration.
#[must_use]
pub fn reader_for(collection: &CollectionConfig) -> Box<dyn FormatReader> {
    match collection.kind {
        CollectionKind::Table => Box::new(TabularReader::from_collection(collection)),
        CollectionKind::JBrowse2 => Box::new(JBrowseReader::new()),
    }
}
