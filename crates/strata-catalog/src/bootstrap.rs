//! Catalog bootstrap coordination.
//!
//! The coordinator is a two-state machine, `Uninitialized` →
//! `Initialized`, whose transition is guarded by the InitLock: a
//! [`StoreLock`] at a well-known key. Exactly one process performs
//! bootstrap; everyone else waits for the initialized state to appear.
//!
//! The destructive reset path preserves the sentinel. A reset that
//! deleted the lock object would hand a racing process a free
//! acquisition: it would find no lock, "win" it, and re-wipe a catalog
//! the first process is still populating. The sweep therefore captures
//! the sentinel first, never deletes the lock key, restores the capture
//! if the backend lost it anyway, and re-binds the held guard — all
//! inside the critical section.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use strata_core::lock::{DEFAULT_LOCK_TTL, DEFAULT_MAX_RETRIES};
use strata_core::{Error, LockGuard, ScopedStorage, StoreLock, WritePrecondition};

use crate::error::{CatalogError, Result};

/// Default polling interval while waiting for a peer to finish bootstrap.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Catalog lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogState {
    /// No process has completed bootstrap yet.
    Uninitialized,
    /// Bootstrap completed; steady-state ingestion may proceed.
    Initialized,
}

/// The persisted state document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StateDocument {
    state: CatalogState,
    #[serde(skip_serializing_if = "Option::is_none")]
    initialized_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    initialized_by: Option<String>,
}

/// Outcome of an [`BootstrapCoordinator::ensure_initialized`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// This process performed the bootstrap.
    Performed,
    /// The catalog was already initialized; nothing was done.
    AlreadyInitialized,
    /// Another process held the InitLock; this process waited until the
    /// initialized state appeared.
    WaitedForPeer,
}

/// Coordinates single-writer catalog bootstrap across processes.
pub struct BootstrapCoordinator {
    storage: ScopedStorage,
    lock: StoreLock,
    lock_ttl: Duration,
    lock_max_retries: u32,
    poll_interval: Duration,
}

impl BootstrapCoordinator {
    /// Creates a coordinator for the given catalog scope.
    #[must_use]
    pub fn new(storage: ScopedStorage) -> Self {
        let lock = StoreLock::new(storage.backend().clone(), storage.bootstrap_lock_key());
        Self {
            storage,
            lock,
            lock_ttl: DEFAULT_LOCK_TTL,
            lock_max_retries: DEFAULT_MAX_RETRIES,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Sets the lock acquisition policy.
    #[must_use]
    pub const fn with_lock_policy(mut self, ttl: Duration, max_retries: u32) -> Self {
        self.lock_ttl = ttl;
        self.lock_max_retries = max_retries;
        self
    }

    /// Sets the polling interval for waiting on a peer's bootstrap.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Reads the current catalog state.
    ///
    /// # Errors
    ///
    /// Returns an error if the state document exists but cannot be read.
    pub async fn state(&self) -> Result<CatalogState> {
        match self.storage.get(&self.storage.catalog_state_key()).await {
            Ok(data) => {
                let document: StateDocument =
                    serde_json::from_slice(&data).map_err(|e| CatalogError::Corrupt {
                        key: self.storage.catalog_state_key(),
                        message: e.to_string(),
                    })?;
                Ok(document.state)
            }
            Err(Error::NotFound(_)) => Ok(CatalogState::Uninitialized),
            Err(e) => Err(e.into()),
        }
    }

    /// Drives the catalog to the initialized state.
    ///
    /// With `reset` set, the catalog is wiped (sentinel preserved) and
    /// rebuilt even if already initialized. Lock contention is not a
    /// failure: a process that cannot acquire the InitLock waits up to
    /// `wait_timeout` for the winner to finish.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::NotInitialized`] if the wait timed out,
    /// or a storage error if bootstrap itself failed.
    pub async fn ensure_initialized(
        &self,
        reset: bool,
        wait_timeout: Duration,
    ) -> Result<BootstrapOutcome> {
        if !reset && self.state().await? == CatalogState::Initialized {
            return Ok(BootstrapOutcome::AlreadyInitialized);
        }

        let guard = match self
            .lock
            .acquire_with_operation(
                self.lock_ttl,
                self.lock_max_retries,
                Some("Bootstrap".into()),
            )
            .await
        {
            Ok(guard) => guard,
            Err(Error::PreconditionFailed { .. }) => {
                // A peer holds the InitLock; never bootstrap without it.
                tracing::info!(store = self.storage.store_id(), "waiting for peer bootstrap");
                self.wait_initialized(wait_timeout).await?;
                return Ok(BootstrapOutcome::WaitedForPeer);
            }
            Err(e) => return Err(e.into()),
        };

        let mut guard = guard;
        let outcome = self.bootstrap_under_lock(&mut guard, reset).await;
        guard.release().await?;
        outcome
    }

    async fn bootstrap_under_lock(
        &self,
        guard: &mut LockGuard,
        reset: bool,
    ) -> Result<BootstrapOutcome> {
        // Double-check under the lock: a peer may have finished between
        // our first read and the acquisition.
        if !reset && self.state().await? == CatalogState::Initialized {
            return Ok(BootstrapOutcome::AlreadyInitialized);
        }

        if reset {
            self.wipe_preserving_sentinel(guard).await?;
        }

        let document = StateDocument {
            state: CatalogState::Initialized,
            initialized_at: Some(Utc::now()),
            initialized_by: Some(guard.holder_id().to_string()),
        };
        let data = serde_json::to_vec(&document)
            .map(bytes::Bytes::from)
            .map_err(|e| Error::serialization(e.to_string()))?;
        self.storage
            .put(
                &self.storage.catalog_state_key(),
                data,
                WritePrecondition::None,
            )
            .await?;

        tracing::info!(
            store = self.storage.store_id(),
            holder = guard.holder_id(),
            sequence = guard.sequence_number(),
            reset,
            "catalog bootstrap complete"
        );
        Ok(BootstrapOutcome::Performed)
    }

    /// Wipes catalog state while keeping exactly one InitLock present.
    ///
    /// Sequence, all under the held guard: capture the sentinel bytes,
    /// sweep every object in scope except the lock key, restore the
    /// capture if the lock object vanished anyway, then re-bind the
    /// guard to the (possibly re-written) lock object via extend.
    async fn wipe_preserving_sentinel(&self, guard: &mut LockGuard) -> Result<()> {
        let lock_key = self.storage.bootstrap_lock_key();

        let sentinel = self.storage.get(&lock_key).await?;

        let objects = self.storage.list(&self.storage.scope_prefix()).await?;
        let mut deleted = 0_u64;
        for object in objects {
            if object.path == lock_key {
                continue;
            }
            self.storage.delete(&object.path).await?;
            deleted += 1;
        }

        if self.storage.head(&lock_key).await?.is_none() {
            self.storage
                .put(&lock_key, sentinel, WritePrecondition::None)
                .await?;
        }

        // The lock object may have a new version token now; extend
        // re-binds the guard so release still works, and buys the
        // rebuild a fresh TTL.
        guard.extend(self.lock_ttl).await?;

        tracing::warn!(
            store = self.storage.store_id(),
            deleted,
            "catalog wiped, sentinel preserved"
        );
        Ok(())
    }

    /// Waits until the catalog reaches the initialized state.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::NotInitialized`] if the state did not
    /// appear within `timeout`.
    pub async fn wait_initialized(&self, timeout: Duration) -> Result<()> {
        let started = tokio::time::Instant::now();
        loop {
            if self.state().await? == CatalogState::Initialized {
                return Ok(());
            }
            if started.elapsed() >= timeout {
                return Err(CatalogError::NotInitialized {
                    waited_secs: timeout.as_secs(),
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use bytes::Bytes;
    use strata_core::storage::MemoryBackend;

    fn scope() -> ScopedStorage {
        ScopedStorage::new(Arc::new(MemoryBackend::new()), "test").expect("scope")
    }

    fn coordinator(storage: &ScopedStorage) -> BootstrapCoordinator {
        BootstrapCoordinator::new(storage.clone())
            .with_lock_policy(Duration::from_secs(5), 2)
            .with_poll_interval(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn starts_uninitialized_then_initializes() {
        let storage = scope();
        let coordinator = coordinator(&storage);

        assert_eq!(
            coordinator.state().await.expect("state"),
            CatalogState::Uninitialized
        );

        let outcome = coordinator
            .ensure_initialized(false, Duration::from_secs(1))
            .await
            .expect("bootstrap");
        assert_eq!(outcome, BootstrapOutcome::Performed);
        assert_eq!(
            coordinator.state().await.expect("state"),
            CatalogState::Initialized
        );
    }

    #[tokio::test]
    async fn second_call_is_a_no_op() {
        let storage = scope();
        let coordinator = coordinator(&storage);

        coordinator
            .ensure_initialized(false, Duration::from_secs(1))
            .await
            .expect("bootstrap");
        let outcome = coordinator
            .ensure_initialized(false, Duration::from_secs(1))
            .await
            .expect("bootstrap");
        assert_eq!(outcome, BootstrapOutcome::AlreadyInitialized);
    }

    #[tokio::test]
    async fn reset_wipes_catalog_but_keeps_sentinel() {
        let storage = scope();
        let coordinator = coordinator(&storage);

        coordinator
            .ensure_initialized(false, Duration::from_secs(1))
            .await
            .expect("bootstrap");

        // Populate some catalog state.
        let stale_key = storage.key("catalog/entries/w/old.json").expect("key");
        storage
            .put(
                &stale_key,
                Bytes::from_static(b"{}"),
                WritePrecondition::None,
            )
            .await
            .expect("seed");

        let outcome = coordinator
            .ensure_initialized(true, Duration::from_secs(1))
            .await
            .expect("reset");
        assert_eq!(outcome, BootstrapOutcome::Performed);

        // The stale entry is gone, the state doc is back, and exactly
        // one InitLock object is present.
        assert!(storage.head(&stale_key).await.expect("head").is_none());
        assert_eq!(
            coordinator.state().await.expect("state"),
            CatalogState::Initialized
        );
        assert!(storage
            .head(&storage.bootstrap_lock_key())
            .await
            .expect("head")
            .is_some());
    }

    #[tokio::test]
    async fn wait_times_out_when_nobody_bootstraps() {
        let storage = scope();
        let coordinator = coordinator(&storage);

        let err = coordinator
            .wait_initialized(Duration::from_millis(50))
            .await
            .expect_err("must time out");
        assert!(matches!(err, CatalogError::NotInitialized { .. }));
    }
}
