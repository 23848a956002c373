//! Store-scoped storage with the documented path layout.
//!
//! Every strata deployment occupies a single prefix inside a storage
//! backend (`store={store_id}/`). All catalog state lives under that
//! prefix:
//!
//! ```text
//! store={store_id}/
//! ├── locks/bootstrap.lock.json            # InitLock sentinel
//! ├── catalog/state.json                   # bootstrap state document
//! ├── catalog/entries/{workflow}/{tag}.json
//! └── collections/{workflow}/{tag}/
//!     ├── manifest.json                    # CAS-committed table manifest
//!     └── segments/{segment_key}.json      # immutable columnar segments
//! ```
//!
//! The `key=value` prefix keeps listings grep-friendly and makes scope
//! extraction from any path trivial. Path traversal is rejected at
//! construction and on every helper.

use bytes::Bytes;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::id::CollectionId;
use crate::storage::{ObjectMeta, StorageBackend, WritePrecondition, WriteResult};

/// Storage key of the InitLock sentinel, relative to the scope prefix.
pub const BOOTSTRAP_LOCK_KEY: &str = "locks/bootstrap.lock.json";

/// Storage key of the bootstrap state document, relative to the scope prefix.
pub const CATALOG_STATE_KEY: &str = "catalog/state.json";

/// Prefix for catalog entry documents, relative to the scope prefix.
pub const CATALOG_ENTRIES_PREFIX: &str = "catalog/entries/";

/// Prefix for collection tables, relative to the scope prefix.
pub const COLLECTIONS_PREFIX: &str = "collections/";

/// Store-scoped storage wrapper.
///
/// Prefixes every key with `store={store_id}/` and provides the path
/// helpers for the catalog layout above.
#[derive(Clone)]
pub struct ScopedStorage {
    backend: Arc<dyn StorageBackend>,
    store_id: String,
}

impl ScopedStorage {
    /// Creates a new scoped storage wrapper.
    ///
    /// # Errors
    ///
    /// Returns an error if `store_id` is empty or contains characters
    /// outside lowercase alphanumerics plus `-` and `_`.
    pub fn new(backend: Arc<dyn StorageBackend>, store_id: impl Into<String>) -> Result<Self> {
        let store_id = store_id.into();
        if store_id.is_empty()
            || !store_id
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_'))
        {
            return Err(Error::InvalidId {
                message: format!("invalid store id '{store_id}': expected [a-z0-9_-]+"),
            });
        }
        Ok(Self { backend, store_id })
    }

    /// Returns the underlying backend.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Returns the store identifier for this scope.
    #[must_use]
    pub fn store_id(&self) -> &str {
        &self.store_id
    }

    /// Returns the absolute key for a scope-relative path.
    ///
    /// # Errors
    ///
    /// Returns an error on path traversal attempts.
    pub fn key(&self, relative: &str) -> Result<String> {
        if relative.split('/').any(|seg| seg == "..") {
            return Err(Error::InvalidInput(format!(
                "path traversal rejected: {relative}"
            )));
        }
        Ok(format!("store={}/{relative}", self.store_id))
    }

    /// Strips the scope prefix from an absolute key.
    #[must_use]
    pub fn relative<'a>(&self, absolute: &'a str) -> Option<&'a str> {
        absolute.strip_prefix(&format!("store={}/", self.store_id))
    }

    // ------------------------------------------------------------------
    // Path helpers
    // ------------------------------------------------------------------

    /// Key of the InitLock sentinel for this scope.
    #[must_use]
    pub fn bootstrap_lock_key(&self) -> String {
        format!("store={}/{BOOTSTRAP_LOCK_KEY}", self.store_id)
    }

    /// Key of the bootstrap state document for this scope.
    #[must_use]
    pub fn catalog_state_key(&self) -> String {
        format!("store={}/{CATALOG_STATE_KEY}", self.store_id)
    }

    /// Key of the catalog entry document for a collection.
    #[must_use]
    pub fn catalog_entry_key(&self, id: &CollectionId) -> String {
        format!(
            "store={}/{CATALOG_ENTRIES_PREFIX}{}/{}.json",
            self.store_id, id.workflow, id.tag
        )
    }

    /// Prefix under which all catalog entries live.
    #[must_use]
    pub fn catalog_entries_prefix(&self) -> String {
        format!("store={}/{CATALOG_ENTRIES_PREFIX}", self.store_id)
    }

    /// Key of the table manifest for a collection.
    #[must_use]
    pub fn table_manifest_key(&self, id: &CollectionId) -> String {
        format!(
            "store={}/{COLLECTIONS_PREFIX}{}/{}/manifest.json",
            self.store_id, id.workflow, id.tag
        )
    }

    /// Prefix under which a collection's segments live.
    #[must_use]
    pub fn segments_prefix(&self, id: &CollectionId) -> String {
        format!(
            "store={}/{COLLECTIONS_PREFIX}{}/{}/segments/",
            self.store_id, id.workflow, id.tag
        )
    }

    /// Key of a segment object for a collection.
    #[must_use]
    pub fn segment_key(&self, id: &CollectionId, segment: &str) -> String {
        format!("{}{segment}.json", self.segments_prefix(id))
    }

    /// Prefix covering every object in this scope.
    #[must_use]
    pub fn scope_prefix(&self) -> String {
        format!("store={}/", self.store_id)
    }

    // ------------------------------------------------------------------
    // Delegated operations (absolute keys computed by the helpers above)
    // ------------------------------------------------------------------

    /// Reads an object by absolute key.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the object doesn't exist.
    pub async fn get(&self, key: &str) -> Result<Bytes> {
        self.backend.get(key).await
    }

    /// Writes an object by absolute key with a precondition.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying write fails.
    pub async fn put(
        &self,
        key: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        self.backend.put(key, data, precondition).await
    }

    /// Deletes an object by absolute key.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying delete fails.
    pub async fn delete(&self, key: &str) -> Result<()> {
        self.backend.delete(key).await
    }

    /// Lists objects under an absolute prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying list fails.
    pub async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        self.backend.list(prefix).await
    }

    /// Reads object metadata by absolute key.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying head fails.
    pub async fn head(&self, key: &str) -> Result<Option<ObjectMeta>> {
        self.backend.head(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{CollectionTag, WorkflowName};
    use crate::storage::MemoryBackend;

    fn scope() -> ScopedStorage {
        ScopedStorage::new(Arc::new(MemoryBackend::new()), "prod").expect("scope")
    }

    fn collection() -> CollectionId {
        CollectionId::new(
            WorkflowName::new("rnaseq").expect("name"),
            CollectionTag::new("metadata").expect("tag"),
        )
    }

    #[test]
    fn rejects_invalid_store_ids() {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        assert!(ScopedStorage::new(backend.clone(), "").is_err());
        assert!(ScopedStorage::new(backend.clone(), "Has/Slash").is_err());
        assert!(ScopedStorage::new(backend, "UPPER").is_err());
    }

    #[test]
    fn path_layout() {
        let storage = scope();
        let id = collection();

        assert_eq!(
            storage.bootstrap_lock_key(),
            "store=prod/locks/bootstrap.lock.json"
        );
        assert_eq!(storage.catalog_state_key(), "store=prod/catalog/state.json");
        assert_eq!(
            storage.catalog_entry_key(&id),
            "store=prod/catalog/entries/rnaseq/metadata.json"
        );
        assert_eq!(
            storage.table_manifest_key(&id),
            "store=prod/collections/rnaseq/metadata/manifest.json"
        );
        assert_eq!(
            storage.segment_key(&id, "run-1-01J"),
            "store=prod/collections/rnaseq/metadata/segments/run-1-01J.json"
        );
    }

    #[test]
    fn key_rejects_traversal() {
        let storage = scope();
        assert!(storage.key("a/../b").is_err());
        assert!(storage.key("catalog/entries/x.json").is_ok());
    }

    #[test]
    fn relative_strips_scope() {
        let storage = scope();
        assert_eq!(
            storage.relative("store=prod/catalog/state.json"),
            Some("catalog/state.json")
        );
        assert_eq!(storage.relative("store=other/catalog/state.json"), None);
    }
}
