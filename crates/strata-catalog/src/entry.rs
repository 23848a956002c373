//! Published catalog entries.
//!
//! A catalog entry is the externally visible metadata for one
//! collection or join output: its schema, where its table lives, the
//! table version the entry reflects, and lineage for derived tables.
//! Entries are single JSON documents, so consumers always observe a
//! whole entry — an old one or a new one, never a mix.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use strata_core::CollectionId;
use strata_store::{LineageSource, Schema};

/// The published metadata document for a collection or join output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    /// The collection this entry describes.
    pub id: CollectionId,

    /// Column name to semantic type.
    pub schema: Schema,

    /// Storage pointer to the collection's table manifest.
    pub storage_pointer: String,

    /// Entry version counter; bumps on every registration.
    pub version: u64,

    /// The table manifest version this entry reflects.
    pub table_version: u64,

    /// Source collections and versions for join outputs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lineage: Option<Vec<LineageSource>>,

    /// When the entry was first registered.
    pub created_at: DateTime<Utc>,

    /// When the entry was last updated.
    pub updated_at: DateTime<Utc>,
}

impl CatalogEntry {
    /// Returns whether this entry describes a derived (joined) table.
    #[must_use]
    pub fn is_derived(&self) -> bool {
        self.lineage.is_some()
    }
}
