//! Catalog registration.
//!
//! Upsert semantics keyed by collection identity: the first
//! registration creates the entry at version 1 with a `DoesNotExist`
//! precondition; later registrations bump the version and replace
//! schema and pointer through a CAS on the entry document. The read
//! path takes no locks — consumers `get` or `list` at will.

use bytes::Bytes;
use chrono::Utc;

use strata_core::{CollectionId, ScopedStorage, WritePrecondition, WriteResult};
use strata_store::{LineageSource, Schema};

use crate::entry::CatalogEntry;
use crate::error::{CatalogError, Result};

/// Maximum CAS retries for entry upserts.
const DEFAULT_MAX_UPSERT_RETRIES: u32 = 10;

/// Registers and serves catalog entries.
#[derive(Clone)]
pub struct Registrar {
    storage: ScopedStorage,
    max_retries: u32,
}

impl Registrar {
    /// Creates a registrar over the given catalog storage.
    #[must_use]
    pub fn new(storage: ScopedStorage) -> Self {
        Self {
            storage,
            max_retries: DEFAULT_MAX_UPSERT_RETRIES,
        }
    }

    /// Sets the maximum CAS retries for upserts.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Registers or updates the entry for a collection.
    ///
    /// The entry version starts at 1 and bumps on every registration;
    /// schema and pointer are replaced atomically with the bump because
    /// the whole entry is one document write.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::UpsertConflict`] if concurrent
    /// registrations kept moving the document past the retry budget.
    pub async fn register(
        &self,
        id: &CollectionId,
        schema: Schema,
        storage_pointer: String,
        table_version: u64,
        lineage: Option<Vec<LineageSource>>,
    ) -> Result<CatalogEntry> {
        let key = self.storage.catalog_entry_key(id);

        for _ in 0..self.max_retries {
            let existing = self.load(&key).await?;

            let (entry, precondition) = match existing {
                None => {
                    let now = Utc::now();
                    let entry = CatalogEntry {
                        id: id.clone(),
                        schema: schema.clone(),
                        storage_pointer: storage_pointer.clone(),
                        version: 1,
                        table_version,
                        lineage: lineage.clone(),
                        created_at: now,
                        updated_at: now,
                    };
                    (entry, WritePrecondition::DoesNotExist)
                }
                Some((current, token)) => {
                    let mut entry = current;
                    entry.version += 1;
                    entry.schema = schema.clone();
                    entry.storage_pointer = storage_pointer.clone();
                    entry.table_version = table_version;
                    entry.lineage = lineage.clone();
                    entry.updated_at = Utc::now();
                    (entry, WritePrecondition::MatchesVersion(token))
                }
            };

            let data = serde_json::to_vec(&entry)
                .map(Bytes::from)
                .map_err(|e| strata_core::Error::serialization(e.to_string()))?;

            match self.storage.put(&key, data, precondition).await? {
                WriteResult::Success { .. } => {
                    tracing::info!(
                        entry = %id,
                        version = entry.version,
                        table_version,
                        "catalog entry registered"
                    );
                    return Ok(entry);
                }
                WriteResult::PreconditionFailed { .. } => {
                    // Concurrent registrar; reload and retry.
                }
            }
        }

        Err(CatalogError::UpsertConflict {
            entry: id.to_string(),
            attempts: self.max_retries,
        })
    }

    /// Reads the entry for a collection, if registered.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails or the document is corrupt.
    pub async fn get(&self, id: &CollectionId) -> Result<Option<CatalogEntry>> {
        let key = self.storage.catalog_entry_key(id);
        Ok(self.load(&key).await?.map(|(entry, _)| entry))
    }

    /// Lists all registered entries.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails or a document is corrupt.
    pub async fn list_entries(&self) -> Result<Vec<CatalogEntry>> {
        let prefix = self.storage.catalog_entries_prefix();
        let mut entries = Vec::new();
        for object in self.storage.list(&prefix).await? {
            if let Some((entry, _)) = self.load(&object.path).await? {
                entries.push(entry);
            }
        }
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(entries)
    }

    async fn load(&self, key: &str) -> Result<Option<(CatalogEntry, String)>> {
        let Some(meta) = self.storage.head(key).await? else {
            return Ok(None);
        };
        let data = match self.storage.get(key).await {
            Ok(data) => data,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let entry: CatalogEntry =
            serde_json::from_slice(&data).map_err(|e| CatalogError::Corrupt {
                key: key.to_string(),
                message: e.to_string(),
            })?;
        Ok(Some((entry, meta.version)))
    }
}
