//! Distributed lock over CAS object storage.
//!
//! The bootstrap coordinator uses this lock as the InitLock sentinel:
//! a single well-known object whose existence (and freshness) decides
//! which worker process may perform catalog bootstrap. The protocol:
//!
//! 1. Acquisition writes the lock record with a `DoesNotExist`
//!    precondition; exactly one writer succeeds.
//! 2. If the record exists, the holder's expiry decides takeover: an
//!    expired record may be replaced via `MatchesVersion` CAS bound to
//!    the version observed *before* reading the record contents.
//! 3. Release writes an expired record via CAS instead of deleting, so
//!    a racing takeover is never clobbered.
//! 4. Each acquisition increments a sequence number usable as a fencing
//!    token against stale holders.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::{Error, Result};
use crate::storage::{StorageBackend, WritePrecondition, WriteResult};

/// Default lock TTL (30 seconds).
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(30);

/// Default maximum retry attempts for lock acquisition.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Base backoff duration for retries.
const BACKOFF_BASE: Duration = Duration::from_millis(100);

/// Maximum backoff duration.
const BACKOFF_MAX: Duration = Duration::from_secs(5);

/// Lock record contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockInfo {
    /// Unique lock holder ID.
    pub holder_id: String,

    /// When the lock expires.
    pub expires_at: DateTime<Utc>,

    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,

    /// Monotonically increasing sequence number for fencing.
    ///
    /// Incremented on each acquisition; a higher sequence always takes
    /// precedence over a lower one, which lets readers detect stale
    /// holders after a takeover.
    #[serde(default)]
    pub sequence_number: u64,

    /// Optional description of the guarded operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
}

impl LockInfo {
    /// Creates a new lock record for the given holder, TTL, and sequence.
    #[must_use]
    pub fn new(holder_id: impl Into<String>, ttl: Duration, sequence_number: u64) -> Self {
        let now = Utc::now();
        Self {
            holder_id: holder_id.into(),
            expires_at: now
                + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::seconds(30)),
            acquired_at: now,
            sequence_number,
            operation: None,
        }
    }

    /// Returns whether this lock has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Returns the remaining TTL, or zero if expired.
    #[must_use]
    pub fn remaining_ttl(&self) -> Duration {
        let remaining = self.expires_at - Utc::now();
        let millis = remaining.num_milliseconds();
        if millis <= 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
        }
    }
}

/// A distributed lock at a fixed storage key.
#[derive(Clone)]
pub struct StoreLock {
    storage: Arc<dyn StorageBackend>,
    lock_path: String,
    holder_id: String,
}

impl StoreLock {
    /// Creates a new lock instance with a unique holder ID.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>, lock_path: impl Into<String>) -> Self {
        Self {
            storage,
            lock_path: lock_path.into(),
            holder_id: Ulid::new().to_string(),
        }
    }

    /// Returns the holder ID for this lock instance.
    #[must_use]
    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// Returns the storage key this lock lives at.
    #[must_use]
    pub fn lock_path(&self) -> &str {
        &self.lock_path
    }

    /// Attempts to acquire the lock, retrying with exponential backoff.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PreconditionFailed`] if the lock is still held
    /// after all retries, or a storage error if the backend fails.
    pub async fn acquire(&self, ttl: Duration, max_retries: u32) -> Result<LockGuard> {
        self.acquire_with_operation(ttl, max_retries, None).await
    }

    /// Attempts to acquire the lock, recording the guarded operation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PreconditionFailed`] if the lock is still held
    /// after all retries, or a storage error if the backend fails.
    pub async fn acquire_with_operation(
        &self,
        ttl: Duration,
        max_retries: u32,
        operation: Option<String>,
    ) -> Result<LockGuard> {
        let mut attempts = 0;
        let mut backoff = BACKOFF_BASE;

        loop {
            match self.try_acquire(ttl, operation.clone()).await {
                Ok(guard) => return Ok(guard),
                Err(AcquireError::Held(holder)) => {
                    attempts += 1;
                    if attempts >= max_retries {
                        return Err(Error::PreconditionFailed {
                            message: format!("lock held by {holder} after {max_retries} retries"),
                        });
                    }

                    let jitter = Duration::from_millis(rand_jitter());
                    tokio::time::sleep(backoff.min(BACKOFF_MAX) + jitter).await;
                    backoff = backoff.saturating_mul(2);
                }
                Err(AcquireError::Storage(e)) => return Err(e),
            }
        }
    }

    /// Attempts to acquire the lock once (no retries).
    async fn try_acquire(
        &self,
        ttl: Duration,
        operation: Option<String>,
    ) -> std::result::Result<LockGuard, AcquireError> {
        // New locks start with sequence_number = 1.
        let mut lock_info = LockInfo::new(&self.holder_id, ttl, 1);
        lock_info.operation.clone_from(&operation);

        match self
            .storage
            .put(
                &self.lock_path,
                encode(&lock_info)?,
                WritePrecondition::DoesNotExist,
            )
            .await
            .map_err(AcquireError::Storage)?
        {
            WriteResult::Success { version } => {
                return Ok(LockGuard {
                    storage: self.storage.clone(),
                    lock_path: self.lock_path.clone(),
                    holder_id: self.holder_id.clone(),
                    version,
                    sequence_number: 1,
                    released: false,
                });
            }
            WriteResult::PreconditionFailed { .. } => {
                // Lock exists - check if expired.
            }
        }

        // Get the version FIRST, then read contents: the expiry decision
        // must be bound to the same version used for the takeover CAS.
        let meta = self
            .storage
            .head(&self.lock_path)
            .await
            .map_err(AcquireError::Storage)?;

        let Some(meta) = meta else {
            // Lock disappeared between the create attempt and now - retry.
            return Err(AcquireError::Held("race".into()));
        };

        let existing = self.read_lock().await.map_err(AcquireError::Storage)?;

        match existing {
            Some(info) if info.is_expired() => {
                let new_sequence = info.sequence_number.saturating_add(1);
                let mut new_info = LockInfo::new(&self.holder_id, ttl, new_sequence);
                new_info.operation = operation;

                match self
                    .storage
                    .put(
                        &self.lock_path,
                        encode(&new_info)?,
                        WritePrecondition::MatchesVersion(meta.version),
                    )
                    .await
                    .map_err(AcquireError::Storage)?
                {
                    WriteResult::Success { version } => Ok(LockGuard {
                        storage: self.storage.clone(),
                        lock_path: self.lock_path.clone(),
                        holder_id: self.holder_id.clone(),
                        version,
                        sequence_number: new_sequence,
                        released: false,
                    }),
                    WriteResult::PreconditionFailed { .. } => {
                        // Someone else took it over - retry.
                        Err(AcquireError::Held("unknown".into()))
                    }
                }
            }
            Some(info) => Err(AcquireError::Held(info.holder_id)),
            None => Err(AcquireError::Held("race".into())),
        }
    }

    /// Checks if the lock is currently held (regardless of holder).
    ///
    /// # Errors
    ///
    /// Returns an error if the lock state could not be read.
    pub async fn is_locked(&self) -> Result<bool> {
        Ok(self
            .read_lock()
            .await?
            .is_some_and(|info| !info.is_expired()))
    }

    /// Reads the current lock record without acquiring the lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock state could not be read.
    pub async fn read_lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_lock().await
    }

    async fn read_lock(&self) -> Result<Option<LockInfo>> {
        match self.storage.get(&self.lock_path).await {
            Ok(data) => {
                let info: LockInfo =
                    serde_json::from_slice(&data).map_err(|e| Error::Internal {
                        message: format!("parse lock: {e}"),
                    })?;
                Ok(Some(info))
            }
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// RAII guard for a held lock.
///
/// Prefer calling [`LockGuard::release`] explicitly; the drop path can
/// only do a best-effort release when a runtime is available.
pub struct LockGuard {
    storage: Arc<dyn StorageBackend>,
    lock_path: String,
    holder_id: String,
    /// Opaque version token for CAS operations.
    version: String,
    sequence_number: u64,
    released: bool,
}

impl LockGuard {
    /// Returns the holder ID for this lock.
    #[must_use]
    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// Returns the fencing sequence number for this acquisition.
    #[must_use]
    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    /// Explicitly releases the lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock state could not be read or written.
    pub async fn release(mut self) -> Result<()> {
        self.do_release().await
    }

    /// Extends the lock TTL for long-running critical sections.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is no longer held by this guard.
    pub async fn extend(&mut self, additional_ttl: Duration) -> Result<()> {
        let current = self.read_lock().await?;

        match current {
            Some(info) if info.holder_id == self.holder_id => {
                let mut new_info = info;
                new_info.expires_at = Utc::now()
                    + chrono::Duration::from_std(additional_ttl)
                        .unwrap_or(chrono::Duration::seconds(30));

                let meta = self
                    .storage
                    .head(&self.lock_path)
                    .await?
                    .ok_or_else(|| Error::NotFound(self.lock_path.clone()))?;

                match self
                    .storage
                    .put(
                        &self.lock_path,
                        encode(&new_info).map_err(AcquireError::into_error)?,
                        WritePrecondition::MatchesVersion(meta.version),
                    )
                    .await?
                {
                    WriteResult::Success { version } => {
                        self.version = version;
                        Ok(())
                    }
                    WriteResult::PreconditionFailed { .. } => Err(Error::PreconditionFailed {
                        message: "lock modified by another holder".into(),
                    }),
                }
            }
            Some(_) => Err(Error::PreconditionFailed {
                message: "lock held by different holder".into(),
            }),
            None => Err(Error::NotFound(self.lock_path.clone())),
        }
    }

    /// Writes an expired record via CAS instead of deleting.
    ///
    /// Deleting would race a takeover: a new holder could acquire
    /// between our ownership check and the delete. The expired record
    /// preserves the sequence number for the next acquisition.
    async fn do_release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }

        if let Some(info) = self.read_lock().await? {
            if info.holder_id == self.holder_id {
                let expired_info = LockInfo {
                    holder_id: self.holder_id.clone(),
                    expires_at: Utc::now() - chrono::Duration::seconds(1),
                    acquired_at: info.acquired_at,
                    sequence_number: info.sequence_number,
                    operation: None,
                };

                // On PreconditionFailed another holder took over; leave
                // their lock intact.
                let _ = self
                    .storage
                    .put(
                        &self.lock_path,
                        encode(&expired_info).map_err(AcquireError::into_error)?,
                        WritePrecondition::MatchesVersion(self.version.clone()),
                    )
                    .await?;
            }
        }

        self.released = true;
        Ok(())
    }

    async fn read_lock(&self) -> Result<Option<LockInfo>> {
        match self.storage.get(&self.lock_path).await {
            Ok(data) => {
                let info: LockInfo =
                    serde_json::from_slice(&data).map_err(|e| Error::Internal {
                        message: format!("parse lock: {e}"),
                    })?;
                Ok(Some(info))
            }
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        // Best-effort async release; without a runtime the TTL handles
        // eventual cleanup.
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let storage = self.storage.clone();
        let path = self.lock_path.clone();
        let holder = self.holder_id.clone();
        let version = self.version.clone();

        handle.spawn(async move {
            if let Ok(Some(meta)) = storage.head(&path).await {
                if meta.version != version {
                    return;
                }
                if let Ok(data) = storage.get(&path).await {
                    if let Ok(info) = serde_json::from_slice::<LockInfo>(&data) {
                        if info.holder_id == holder {
                            let expired = LockInfo {
                                holder_id: holder,
                                expires_at: Utc::now() - chrono::Duration::seconds(1),
                                acquired_at: info.acquired_at,
                                sequence_number: info.sequence_number,
                                operation: None,
                            };
                            if let Ok(bytes) = serde_json::to_vec(&expired) {
                                let _ = storage
                                    .put(
                                        &path,
                                        Bytes::from(bytes),
                                        WritePrecondition::MatchesVersion(version),
                                    )
                                    .await;
                            }
                        }
                    }
                }
            }
        });
    }
}

/// Internal lock acquisition errors.
enum AcquireError {
    Held(String),
    Storage(Error),
}

impl AcquireError {
    fn into_error(self) -> Error {
        match self {
            Self::Held(holder) => Error::PreconditionFailed {
                message: format!("lock held by {holder}"),
            },
            Self::Storage(e) => e,
        }
    }
}

fn encode(info: &LockInfo) -> std::result::Result<Bytes, AcquireError> {
    serde_json::to_vec(info)
        .map(Bytes::from)
        .map_err(|e| {
            AcquireError::Storage(Error::Internal {
                message: format!("serialize lock: {e}"),
            })
        })
}

/// Generates random jitter for backoff (0-50ms).
fn rand_jitter() -> u64 {
    use std::time::SystemTime;
    let seed = u64::from(
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos(),
    );
    seed % 50
}
