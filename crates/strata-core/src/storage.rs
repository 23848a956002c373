//! Storage backend abstraction over object stores and local trees.
//!
//! The catalog, table manifests, and columnar segments all live behind
//! this contract. Two properties matter:
//!
//! - Conditional writes with preconditions (CAS), used for manifest
//!   commits, lock acquisition, and catalog upserts
//! - Recursive prefix listing, used by the run discoverer so that a
//!   local workflow tree and an object-store bucket behave identically
//!
//! The version token is an opaque `String`: the memory backend uses a
//! numeric generation, the local filesystem backend uses a content
//! digest. Callers must never interpret it beyond equality.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};

/// Precondition for conditional writes (CAS operations).
#[derive(Debug, Clone)]
pub enum WritePrecondition {
    /// Write only if the object does not exist.
    DoesNotExist,
    /// Write only if the object's version matches the given token.
    MatchesVersion(String),
    /// Write unconditionally.
    None,
}

/// Result of a conditional write.
#[derive(Debug, Clone)]
pub enum WriteResult {
    /// Write succeeded, returns the new version token.
    Success {
        /// The new version token after the write.
        version: String,
    },
    /// Precondition failed, returns the current version token.
    PreconditionFailed {
        /// The version that caused the precondition to fail.
        current_version: String,
    },
}

/// Metadata about a stored object.
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    /// Object path (key), relative to the backend root.
    pub path: String,
    /// Object size in bytes.
    pub size: u64,
    /// Opaque version token for CAS operations.
    pub version: String,
    /// Last modification timestamp, if the backend tracks one.
    pub last_modified: Option<DateTime<Utc>>,
}

/// Storage backend trait.
///
/// All backends (memory, local filesystem, object stores) implement
/// this contract, designed around cloud object storage semantics.
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Reads an entire object.
    ///
    /// Returns `Error::NotFound` if the object doesn't exist.
    async fn get(&self, path: &str) -> Result<Bytes>;

    /// Writes an object with an optional precondition.
    ///
    /// Returns `WriteResult::PreconditionFailed` if the precondition is
    /// not met. Precondition failure is a normal result, never an error.
    async fn put(&self, path: &str, data: Bytes, precondition: WritePrecondition)
        -> Result<WriteResult>;

    /// Deletes an object. Succeeds even if the object doesn't exist.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Lists objects with the given prefix, recursively.
    ///
    /// Returns an empty vec if no objects match. Ordering is arbitrary;
    /// callers requiring determinism must sort.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>>;

    /// Gets object metadata without reading content.
    ///
    /// Returns `None` if the object doesn't exist.
    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>>;
}

// ============================================================================
// Memory backend
// ============================================================================

/// In-memory storage backend for testing.
///
/// Thread-safe via `RwLock`. Uses numeric generations internally
/// (exposed as strings) to simulate object-store versioning.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    objects: Arc<RwLock<HashMap<String, StoredObject>>>,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    version: i64,
    last_modified: DateTime<Utc>,
}

impl MemoryBackend {
    /// Creates a new empty memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, path: &str) -> Result<Bytes> {
        let objects = self.objects.read().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;

        objects
            .get(path)
            .map(|o| o.data.clone())
            .ok_or_else(|| Error::NotFound(format!("object not found: {path}")))
    }

    async fn put(
        &self,
        path: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        let mut objects = self.objects.write().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;

        let current = objects.get(path);

        match precondition {
            WritePrecondition::DoesNotExist => {
                if let Some(obj) = current {
                    return Ok(WriteResult::PreconditionFailed {
                        current_version: obj.version.to_string(),
                    });
                }
            }
            WritePrecondition::MatchesVersion(expected) => {
                let expected_num: i64 = expected.parse().unwrap_or(-1);
                match current {
                    Some(obj) if obj.version != expected_num => {
                        return Ok(WriteResult::PreconditionFailed {
                            current_version: obj.version.to_string(),
                        });
                    }
                    None => {
                        return Ok(WriteResult::PreconditionFailed {
                            current_version: "0".to_string(),
                        });
                    }
                    _ => {}
                }
            }
            WritePrecondition::None => {}
        }

        let new_version = current.map_or(1, |o| o.version + 1);
        objects.insert(
            path.to_string(),
            StoredObject {
                data,
                version: new_version,
                last_modified: Utc::now(),
            },
        );
        drop(objects);

        Ok(WriteResult::Success {
            version: new_version.to_string(),
        })
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.objects
            .write()
            .map_err(|_| Error::Internal {
                message: "lock poisoned".into(),
            })?
            .remove(path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let objects = self.objects.read().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;

        Ok(objects
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(path, obj)| ObjectMeta {
                path: path.clone(),
                size: obj.data.len() as u64,
                version: obj.version.to_string(),
                last_modified: Some(obj.last_modified),
            })
            .collect())
    }

    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>> {
        let objects = self.objects.read().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;

        Ok(objects.get(path).map(|obj| ObjectMeta {
            path: path.to_string(),
            size: obj.data.len() as u64,
            version: obj.version.to_string(),
            last_modified: Some(obj.last_modified),
        }))
    }
}

// ============================================================================
// Local filesystem backend
// ============================================================================

/// Local filesystem backend rooted at a directory.
///
/// Backs workflow run trees on a worker's disk and single-process local
/// deployments of the catalog itself. Writes go through a temp file
/// plus rename for atomicity; creation races are resolved by
/// `create_new`. Version tokens are content digests, so CAS compares
/// what is actually on disk. Same-process writers are serialized
/// through an internal mutex; multi-process deployments sharing one
/// catalog root should use a real object store instead.
#[derive(Debug)]
pub struct LocalFsBackend {
    root: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl LocalFsBackend {
    /// Creates a backend rooted at the given directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the root cannot be created.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .map_err(|e| Error::storage_with_source(format!("create root {}", root.display()), e))?;
        Ok(Self {
            root,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Resolves a key to an absolute path under the root.
    fn resolve(&self, key: &str) -> Result<PathBuf> {
        if key.split('/').any(|seg| seg == "..") {
            return Err(Error::InvalidInput(format!(
                "path traversal rejected: {key}"
            )));
        }
        Ok(self.root.join(key))
    }

    fn digest(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        let hash = hasher.finalize();
        hex_prefix(&hash, 16)
    }

    async fn current_version(&self, path: &Path) -> Result<Option<String>> {
        match tokio::fs::read(path).await {
            Ok(data) => Ok(Some(Self::digest(&data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::storage_with_source(
                format!("read {}", path.display()),
                e,
            )),
        }
    }

    async fn write_atomic(&self, path: &Path, data: &Bytes) -> Result<()> {
        let parent = path.parent().ok_or_else(|| {
            Error::InvalidInput(format!("key has no parent: {}", path.display()))
        })?;
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::storage_with_source(format!("mkdir {}", parent.display()), e))?;

        let tmp = parent.join(format!(".tmp-{}", ulid::Ulid::new()));
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| Error::storage_with_source(format!("create {}", tmp.display()), e))?;
        file.write_all(data)
            .await
            .map_err(|e| Error::storage_with_source(format!("write {}", tmp.display()), e))?;
        file.sync_all()
            .await
            .map_err(|e| Error::storage_with_source(format!("sync {}", tmp.display()), e))?;
        drop(file);

        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| Error::storage_with_source(format!("rename to {}", path.display()), e))
    }
}

#[async_trait]
impl StorageBackend for LocalFsBackend {
    async fn get(&self, path: &str) -> Result<Bytes> {
        let abs = self.resolve(path)?;
        match tokio::fs::read(&abs).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("object not found: {path}")))
            }
            Err(e) => Err(Error::storage_with_source(format!("read {path}"), e)),
        }
    }

    async fn put(
        &self,
        path: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        let abs = self.resolve(path)?;
        let _guard = self.write_lock.lock().await;

        let current = self.current_version(&abs).await?;

        match &precondition {
            WritePrecondition::DoesNotExist => {
                if let Some(version) = current {
                    return Ok(WriteResult::PreconditionFailed {
                        current_version: version,
                    });
                }
            }
            WritePrecondition::MatchesVersion(expected) => match &current {
                Some(version) if version != expected => {
                    return Ok(WriteResult::PreconditionFailed {
                        current_version: version.clone(),
                    });
                }
                None => {
                    return Ok(WriteResult::PreconditionFailed {
                        current_version: String::new(),
                    });
                }
                _ => {}
            },
            WritePrecondition::None => {}
        }

        self.write_atomic(&abs, &data).await?;
        Ok(WriteResult::Success {
            version: Self::digest(&data),
        })
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let abs = self.resolve(path)?;
        match tokio::fs::remove_file(&abs).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::storage_with_source(format!("delete {path}"), e)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        // A key prefix is not necessarily a directory boundary: walk the
        // deepest existing ancestor directory and filter by key prefix.
        let dir_part = match prefix.rfind('/') {
            Some(idx) => &prefix[..idx],
            None => "",
        };
        let start = self.resolve(dir_part)?;
        if tokio::fs::metadata(&start).await.is_err() {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        let mut pending = vec![start];

        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir)
                .await
                .map_err(|e| Error::storage_with_source(format!("list {}", dir.display()), e))?;

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| Error::storage_with_source(format!("list {}", dir.display()), e))?
            {
                let path = entry.path();
                let file_type = entry.file_type().await.map_err(|e| {
                    Error::storage_with_source(format!("stat {}", path.display()), e)
                })?;

                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }
                if !file_type.is_file() {
                    continue;
                }

                let Ok(rel) = path.strip_prefix(&self.root) else {
                    continue;
                };
                let key = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");

                if !key.starts_with(prefix) || is_temp_key(&key) {
                    continue;
                }

                let meta = entry.metadata().await.map_err(|e| {
                    Error::storage_with_source(format!("stat {}", path.display()), e)
                })?;
                let data = tokio::fs::read(&path).await.map_err(|e| {
                    Error::storage_with_source(format!("read {}", path.display()), e)
                })?;

                out.push(ObjectMeta {
                    path: key,
                    size: meta.len(),
                    version: Self::digest(&data),
                    last_modified: meta.modified().ok().map(DateTime::<Utc>::from),
                });
            }
        }

        Ok(out)
    }

    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>> {
        let abs = self.resolve(path)?;
        let data = match tokio::fs::read(&abs).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::storage_with_source(format!("read {path}"), e)),
        };
        let meta = tokio::fs::metadata(&abs)
            .await
            .map_err(|e| Error::storage_with_source(format!("stat {path}"), e))?;

        Ok(Some(ObjectMeta {
            path: path.to_string(),
            size: meta.len(),
            version: Self::digest(&data),
            last_modified: meta.modified().ok().map(DateTime::<Utc>::from),
        }))
    }
}

// ============================================================================
// Timeout decorator
// ============================================================================

/// Wraps a backend so that every call carries a deadline.
///
/// No pipeline operation may block indefinitely on storage; wrapping
/// the backend once keeps the timeout policy out of every call site.
pub struct TimeoutBackend {
    inner: Arc<dyn StorageBackend>,
    timeout: std::time::Duration,
}

impl TimeoutBackend {
    /// Wraps `inner` with the given per-call timeout.
    #[must_use]
    pub fn new(inner: Arc<dyn StorageBackend>, timeout: std::time::Duration) -> Self {
        Self { inner, timeout }
    }

    async fn deadline<T>(
        &self,
        operation: &str,
        fut: impl std::future::Future<Output = Result<T>> + Send,
    ) -> Result<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(format!(
                "storage {operation} exceeded {:?}",
                self.timeout
            ))),
        }
    }
}

#[async_trait]
impl StorageBackend for TimeoutBackend {
    async fn get(&self, path: &str) -> Result<Bytes> {
        self.deadline("get", self.inner.get(path)).await
    }

    async fn put(
        &self,
        path: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        self.deadline("put", self.inner.put(path, data, precondition))
            .await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.deadline("delete", self.inner.delete(path)).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        self.deadline("list", self.inner.list(prefix)).await
    }

    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>> {
        self.deadline("head", self.inner.head(path)).await
    }
}

/// Returns true for in-flight temp files that must never surface in listings.
fn is_temp_key(key: &str) -> bool {
    key.rsplit('/')
        .next()
        .is_some_and(|name| name.starts_with(".tmp-"))
}

/// Renders the first `len` hex characters of a digest.
fn hex_prefix(bytes: &[u8], len: usize) -> String {
    let mut s = String::with_capacity(len);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{b:02x}");
        if s.len() >= len {
            break;
        }
    }
    s.truncate(len);
    s
}
