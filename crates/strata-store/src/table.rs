//! The versioned table store for one collection.
//!
//! Commit protocol for a run append:
//!
//! 1. Load the manifest; if the run is already a member, report
//!    `AlreadyIngested` without touching storage.
//! 2. Write the segment object at a unique key. Nothing references it
//!    yet, so readers cannot observe it.
//! 3. CAS the manifest (`MatchesVersion`), adding the segment ref, the
//!    ingestion record, and the unified schema. On conflict, reload and
//!    re-check membership: if another worker committed the same run in
//!    the meantime, report `AlreadyIngested` and leave the segment as
//!    an orphan for vacuum.
//!
//! The CAS re-check is the per-(collection, run) compare-and-commit the
//! concurrency model requires: two workers racing the same run resolve
//! through the manifest version, with no lock and no cross-collection
//! coordination.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::time::Duration;
use ulid::Ulid;

use strata_core::{
    CollectionId, RunId, ScopedStorage, WritePrecondition, WriteResult,
};

use crate::error::{Result, StoreError};
use crate::manifest::{IngestionRecord, LineageSource, SegmentRef, TableManifest};
use crate::segment::Segment;
use crate::value::{infer_schema, merge_schema, Row, Schema};

/// Maximum CAS retries for manifest commits.
const DEFAULT_MAX_CAS_RETRIES: u32 = 10;

/// Orphan segments younger than this are left alone by vacuum; they may
/// belong to an in-flight commit.
pub const DEFAULT_VACUUM_GRACE: Duration = Duration::from_secs(3600);

/// Outcome of a run append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The run was committed at the given manifest version.
    Committed {
        /// Manifest version after the commit.
        version: u64,
        /// Rows published for the run.
        row_count: u64,
    },
    /// The run was already present; nothing was committed.
    AlreadyIngested,
}

/// A point-in-time view of a table.
#[derive(Debug, Clone)]
pub struct TableSnapshot {
    /// Manifest version this snapshot reflects.
    pub version: u64,
    /// Schema visible at this version.
    pub schema: Schema,
    /// Materialized rows in commit order.
    pub rows: Vec<Row>,
}

/// Versioned, transactional table store for one collection.
#[derive(Clone)]
pub struct TableStore {
    storage: ScopedStorage,
    id: CollectionId,
    cas_max_retries: u32,
}

impl TableStore {
    /// Creates a store handle for the given collection.
    #[must_use]
    pub fn new(storage: ScopedStorage, id: CollectionId) -> Self {
        Self {
            storage,
            id,
            cas_max_retries: DEFAULT_MAX_CAS_RETRIES,
        }
    }

    /// Sets the maximum CAS retries for manifest commits.
    #[must_use]
    pub const fn with_cas_retries(mut self, max_retries: u32) -> Self {
        self.cas_max_retries = max_retries;
        self
    }

    /// Returns the collection this store is bound to.
    #[must_use]
    pub fn id(&self) -> &CollectionId {
        &self.id
    }

    /// Returns the storage key of this table's manifest, which doubles
    /// as the published storage pointer in catalog entries.
    #[must_use]
    pub fn manifest_key(&self) -> String {
        self.storage.table_manifest_key(&self.id)
    }

    /// Creates the table's manifest if it does not exist (idempotent).
    ///
    /// # Errors
    ///
    /// Returns an error if the storage write fails.
    pub async fn ensure_exists(&self) -> Result<()> {
        let manifest = TableManifest::new();
        let data = encode_manifest(&manifest)?;
        match self
            .storage
            .put(&self.manifest_key(), data, WritePrecondition::DoesNotExist)
            .await?
        {
            WriteResult::Success { .. } | WriteResult::PreconditionFailed { .. } => Ok(()),
        }
    }

    /// Reads the current manifest.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the table was never created.
    pub async fn manifest(&self) -> Result<TableManifest> {
        Ok(self.load_manifest().await?.0)
    }

    /// Returns whether the given run has been committed.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest cannot be read.
    pub async fn contains_run(&self, run_id: &RunId) -> Result<bool> {
        Ok(self.manifest().await?.contains_run(run_id))
    }

    /// Appends a run's rows, committing atomically via manifest CAS.
    ///
    /// Rows must already carry their provenance columns; the store does
    /// not interpret cell content.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CasExhausted`] if the manifest kept moving
    /// past the retry budget; the run is then rolled back whole (its
    /// segment stays unreferenced) and can be retried on a later pass.
    pub async fn append_run(
        &self,
        run_id: RunId,
        rows: &[Row],
        ingested_at: DateTime<Utc>,
    ) -> Result<AppendOutcome> {
        let (manifest, mut token) = self.load_manifest().await?;
        if manifest.contains_run(&run_id) {
            return Ok(AppendOutcome::AlreadyIngested);
        }

        let segment = Segment::from_rows(rows);
        let segment_schema = infer_schema(rows);
        let row_count = segment.row_count as u64;
        let segment_key_name = format!("{run_id}-{}", Ulid::new());
        let segment_key = self.storage.segment_key(&self.id, &segment_key_name);

        // Unique key: unconditional write, invisible until published.
        self.storage
            .put(&segment_key, segment.to_bytes()?, WritePrecondition::None)
            .await?;

        let mut current = manifest;
        for attempt in 0..self.cas_max_retries {
            if attempt > 0 {
                let (reloaded, new_token) = self.load_manifest().await?;
                if reloaded.contains_run(&run_id) {
                    // Another worker won the race for this run; our
                    // segment stays orphaned until vacuum.
                    tracing::debug!(
                        collection = %self.id,
                        run = %run_id,
                        "run committed concurrently, skipping"
                    );
                    return Ok(AppendOutcome::AlreadyIngested);
                }
                current = reloaded;
                token = new_token;
            }

            let mut next = current.clone();
            next.version += 1;
            merge_schema(&mut next.schema, &segment_schema);
            next.segments.push(SegmentRef {
                key: segment_key_name.clone(),
                run_id: Some(run_id.clone()),
                row_count,
                added_version: next.version,
                retired_version: None,
            });
            next.runs.push(IngestionRecord {
                run_id: run_id.clone(),
                ingested_at,
            });
            next.updated_at = Utc::now();

            match self
                .storage
                .put(
                    &self.manifest_key(),
                    encode_manifest(&next)?,
                    WritePrecondition::MatchesVersion(token.clone()),
                )
                .await?
            {
                WriteResult::Success { .. } => {
                    tracing::debug!(
                        collection = %self.id,
                        run = %run_id,
                        version = next.version,
                        rows = row_count,
                        "run committed"
                    );
                    return Ok(AppendOutcome::Committed {
                        version: next.version,
                        row_count,
                    });
                }
                WriteResult::PreconditionFailed { .. } => {}
            }
        }

        Err(StoreError::CasExhausted {
            collection: self.id.to_string(),
            attempts: self.cas_max_retries,
        })
    }

    /// Replaces the table's contents, used for join outputs.
    ///
    /// The previous segments remain in storage for point-in-time reads
    /// of older versions; only the manifest's current segment set is
    /// replaced.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CasExhausted`] on persistent CAS conflict.
    pub async fn replace_contents(
        &self,
        rows: &[Row],
        lineage: Vec<LineageSource>,
    ) -> Result<u64> {
        self.ensure_exists().await?;

        let segment = Segment::from_rows(rows);
        let schema = infer_schema(rows);
        let row_count = segment.row_count as u64;
        let segment_key_name = format!("join-{}", Ulid::new());
        let segment_key = self.storage.segment_key(&self.id, &segment_key_name);

        self.storage
            .put(&segment_key, segment.to_bytes()?, WritePrecondition::None)
            .await?;

        for _ in 0..self.cas_max_retries {
            let (current, token) = self.load_manifest().await?;
            let mut next = current;
            next.version += 1;
            let version = next.version;
            // Retire the previous output; it stays reachable through
            // read_at at older versions.
            for segment in &mut next.segments {
                if segment.retired_version.is_none() {
                    segment.retired_version = Some(version);
                }
            }
            next.segments.push(SegmentRef {
                key: segment_key_name.clone(),
                run_id: None,
                row_count,
                added_version: version,
                retired_version: None,
            });
            next.schema = schema.clone();
            next.lineage = Some(lineage.clone());
            next.updated_at = Utc::now();

            match self
                .storage
                .put(
                    &self.manifest_key(),
                    encode_manifest(&next)?,
                    WritePrecondition::MatchesVersion(token),
                )
                .await?
            {
                WriteResult::Success { .. } => return Ok(next.version),
                WriteResult::PreconditionFailed { .. } => {}
            }
        }

        Err(StoreError::CasExhausted {
            collection: self.id.to_string(),
            attempts: self.cas_max_retries,
        })
    }

    /// Reads the current table state.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest or a referenced segment cannot
    /// be read.
    pub async fn read(&self) -> Result<TableSnapshot> {
        let manifest = self.manifest().await?;
        let version = manifest.version;
        self.read_segments(&manifest, version).await
    }

    /// Reads the table as of a past version.
    ///
    /// Only segments published at or before `version` are visible; the
    /// schema is inferred from those segments alone, so columns added
    /// later do not leak into the past.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest or a referenced segment cannot
    /// be read.
    pub async fn read_at(&self, version: u64) -> Result<TableSnapshot> {
        let manifest = self.manifest().await?;
        self.read_segments(&manifest, version).await
    }

    async fn read_segments(
        &self,
        manifest: &TableManifest,
        version: u64,
    ) -> Result<TableSnapshot> {
        let visible = manifest.segments_at(version);

        let mut segments = Vec::with_capacity(visible.len());
        let mut columns: Vec<String> = Vec::new();
        let mut seen = std::collections::BTreeSet::new();

        for segment_ref in &visible {
            let key = self.storage.segment_key(&self.id, &segment_ref.key);
            let data = self.storage.get(&key).await?;
            let segment = Segment::from_bytes(&key, &data)?;
            for column in segment.columns.keys() {
                if seen.insert(column.clone()) {
                    columns.push(column.clone());
                }
            }
            segments.push(segment);
        }
        columns.sort();

        let mut rows = Vec::new();
        for segment in &segments {
            rows.extend(segment.materialize(&columns));
        }

        let schema = if version >= manifest.version {
            manifest.schema.clone()
        } else {
            infer_schema(&rows)
        };

        Ok(TableSnapshot {
            version: version.min(manifest.version),
            schema,
            rows,
        })
    }

    /// Deletes orphaned segments not referenced by the manifest.
    ///
    /// Returns the number of objects removed. Segments younger than
    /// `grace` are kept; they may belong to a commit still in flight.
    ///
    /// # Errors
    ///
    /// Returns an error if listing or deletion fails.
    pub async fn vacuum(&self, grace: Duration) -> Result<u64> {
        let manifest = self.manifest().await?;
        let referenced: std::collections::BTreeSet<String> = manifest
            .segments
            .iter()
            .map(|s| self.storage.segment_key(&self.id, &s.key))
            .collect();

        let cutoff = Utc::now()
            - chrono::Duration::from_std(grace).unwrap_or_else(|_| chrono::Duration::hours(1));

        let mut removed = 0;
        for object in self.storage.list(&self.storage.segments_prefix(&self.id)).await? {
            if referenced.contains(&object.path) {
                continue;
            }
            let old_enough = object.last_modified.is_none_or(|ts| ts < cutoff);
            if !old_enough {
                continue;
            }
            self.storage.delete(&object.path).await?;
            removed += 1;
        }

        if removed > 0 {
            tracing::info!(collection = %self.id, removed, "vacuumed orphan segments");
        }
        Ok(removed)
    }

    async fn load_manifest(&self) -> Result<(TableManifest, String)> {
        let key = self.manifest_key();
        let meta = self
            .storage
            .head(&key)
            .await?
            .ok_or_else(|| strata_core::Error::NotFound(format!("table manifest: {key}")))?;
        let data = self.storage.get(&key).await?;
        let manifest: TableManifest =
            serde_json::from_slice(&data).map_err(|e| StoreError::Corrupt {
                key: key.clone(),
                message: e.to_string(),
            })?;
        Ok((manifest, meta.version))
    }
}

fn encode_manifest(manifest: &TableManifest) -> Result<Bytes> {
    serde_json::to_vec(manifest)
        .map(Bytes::from)
        .map_err(|e| StoreError::Core(strata_core::Error::serialization(e.to_string())))
}
