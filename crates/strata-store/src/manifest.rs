//! Table manifests: the single source of truth for a collection.
//!
//! The manifest is the only mutable object in a collection's storage
//! footprint. Everything readers need hangs off it: the current union
//! schema, the ordered list of published segments, the set of ingested
//! runs (the membership side of idempotent ingestion), and join lineage
//! for derived tables. All mutations go through CAS on this document,
//! which is what makes a run commit atomic: the segment object exists
//! beforehand, but only the manifest write publishes it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use strata_core::{CollectionId, RunId};

use crate::value::Schema;

/// Reference to a published segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentRef {
    /// Segment key under the collection's segments prefix.
    pub key: String,

    /// The run this segment belongs to; `None` for join outputs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,

    /// Number of rows in the segment.
    pub row_count: u64,

    /// Manifest version at which this segment was published. Readers
    /// pinned to an older version skip segments added after it.
    pub added_version: u64,

    /// Manifest version at which this segment was superseded, if any.
    /// Join recomputations retire the previous output segment while
    /// keeping it reachable for point-in-time reads.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retired_version: Option<u64>,
}

impl SegmentRef {
    /// Returns whether this segment is visible at the given version.
    #[must_use]
    pub fn visible_at(&self, version: u64) -> bool {
        self.added_version <= version && self.retired_version.is_none_or(|r| r > version)
    }
}

/// Provenance record for one ingested run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionRecord {
    /// The ingested run.
    pub run_id: RunId,
    /// When the run was committed.
    pub ingested_at: DateTime<Utc>,
}

/// One source of a derived (joined) table, pinned to the version read
/// at join time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineageSource {
    /// The source collection.
    pub collection: CollectionId,
    /// The source's manifest version when the join executed.
    pub version: u64,
}

/// The CAS-committed manifest of a collection table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableManifest {
    /// Version counter; bumps on every committed mutation.
    pub version: u64,

    /// Current union schema across all published segments.
    pub schema: Schema,

    /// Published segments in commit order.
    pub segments: Vec<SegmentRef>,

    /// Ingested runs, the membership set for dedup.
    pub runs: Vec<IngestionRecord>,

    /// Source versions for derived tables; `None` for base collections.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lineage: Option<Vec<LineageSource>>,

    /// When the table was created.
    pub created_at: DateTime<Utc>,

    /// When the manifest was last committed.
    pub updated_at: DateTime<Utc>,
}

impl TableManifest {
    /// Creates an empty manifest at version 0.
    #[must_use]
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            version: 0,
            schema: Schema::new(),
            segments: Vec::new(),
            runs: Vec::new(),
            lineage: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns whether the given run has already been committed.
    #[must_use]
    pub fn contains_run(&self, run_id: &RunId) -> bool {
        self.runs.iter().any(|r| &r.run_id == run_id)
    }

    /// Returns the segments visible at the given version.
    #[must_use]
    pub fn segments_at(&self, version: u64) -> Vec<&SegmentRef> {
        self.segments
            .iter()
            .filter(|s| s.visible_at(version))
            .collect()
    }

    /// Returns the currently visible row count.
    #[must_use]
    pub fn row_count(&self) -> u64 {
        self.segments_at(self.version).iter().map(|s| s.row_count).sum()
    }
}

impl Default for TableManifest {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_manifest_is_empty_at_version_zero() {
        let manifest = TableManifest::new();
        assert_eq!(manifest.version, 0);
        assert!(manifest.segments.is_empty());
        assert!(manifest.runs.is_empty());
        assert_eq!(manifest.row_count(), 0);
    }

    #[test]
    fn run_membership() {
        let mut manifest = TableManifest::new();
        let run = RunId::new("run-1").expect("run id");
        assert!(!manifest.contains_run(&run));

        manifest.runs.push(IngestionRecord {
            run_id: run.clone(),
            ingested_at: Utc::now(),
        });
        assert!(manifest.contains_run(&run));
    }

    #[test]
    fn segments_at_filters_by_version() {
        let mut manifest = TableManifest::new();
        manifest.segments.push(SegmentRef {
            key: "s1".into(),
            run_id: None,
            row_count: 2,
            added_version: 1,
            retired_version: None,
        });
        manifest.segments.push(SegmentRef {
            key: "s2".into(),
            run_id: None,
            row_count: 3,
            added_version: 2,
            retired_version: None,
        });

        assert_eq!(manifest.segments_at(1).len(), 1);
        assert_eq!(manifest.segments_at(2).len(), 2);
        assert_eq!(manifest.segments_at(0).len(), 0);
    }

    #[test]
    fn retired_segments_stay_visible_in_the_past() {
        let mut manifest = TableManifest::new();
        manifest.version = 2;
        manifest.segments.push(SegmentRef {
            key: "old-join".into(),
            run_id: None,
            row_count: 5,
            added_version: 1,
            retired_version: Some(2),
        });
        manifest.segments.push(SegmentRef {
            key: "new-join".into(),
            run_id: None,
            row_count: 6,
            added_version: 2,
            retired_version: None,
        });

        let at_v1: Vec<_> = manifest.segments_at(1).iter().map(|s| s.key.clone()).collect();
        assert_eq!(at_v1, vec!["old-join"]);
        let at_v2: Vec<_> = manifest.segments_at(2).iter().map(|s| s.key.clone()).collect();
        assert_eq!(at_v2, vec!["new-join"]);
        assert_eq!(manifest.row_count(), 6);
    }
}
