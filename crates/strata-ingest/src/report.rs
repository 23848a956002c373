//! Pass reports.
//!
//! A completed pass never reduces to a boolean: it reports, per
//! collection, how many runs were newly ingested, how many were skipped
//! as already present, and which failed with what reason, plus the
//! outcome of every declared join.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use strata_core::{PassId, RunId};

/// A run that failed to read or commit in this pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunFailure {
    /// The failed run.
    pub run_id: RunId,
    /// Human-readable failure reason.
    pub reason: String,
}

/// Per-collection outcome counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionReport {
    /// The collection tag.
    pub tag: String,
    /// Runs newly ingested this pass.
    pub runs_ingested: u64,
    /// Runs skipped because they were already present.
    pub runs_already_present: u64,
    /// Runs that failed, with reasons; retried next pass.
    pub failures: Vec<RunFailure>,
    /// (run, collection) pairs where the pattern matched no files.
    pub discovery_misses: u64,
    /// Table version after this pass, if the table exists.
    pub table_version: Option<u64>,
}

/// Outcome of one declared join in this pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "outcome")]
pub enum JoinOutcomeReport {
    /// The join was stale and recomputed at the given output version.
    Recomputed {
        /// Output table version after the recompute.
        version: u64,
        /// Rows in the joined output.
        rows: u64,
    },
    /// Source versions matched the recorded lineage; nothing to do.
    UpToDate,
    /// The join failed; unrelated collections are unaffected.
    Failed {
        /// Human-readable failure reason.
        reason: String,
    },
}

/// Report for one declared join.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinReport {
    /// Tag of the derived output table.
    pub output_tag: String,
    /// What happened.
    #[serde(flatten)]
    pub outcome: JoinOutcomeReport,
}

/// Report for one workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowReport {
    /// The workflow name.
    pub workflow: String,
    /// Distinct runs discovered under the workflow's roots.
    pub runs_discovered: u64,
    /// Per-collection outcomes.
    pub collections: Vec<CollectionReport>,
    /// Per-join outcomes.
    pub joins: Vec<JoinReport>,
    /// Linking wildcard values that found no counterpart.
    pub unresolved_links: u64,
}

/// The complete report of one discovery/ingestion pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassReport {
    /// Unique identifier of this pass.
    pub pass_id: PassId,
    /// When the pass started.
    pub started_at: DateTime<Utc>,
    /// When the pass finished (or was cancelled).
    pub finished_at: DateTime<Utc>,
    /// Whether the pass was cancelled before completing.
    pub cancelled: bool,
    /// Per-workflow outcomes.
    pub workflows: Vec<WorkflowReport>,
}

impl PassReport {
    /// Total runs newly ingested across all collections.
    #[must_use]
    pub fn total_ingested(&self) -> u64 {
        self.workflows
            .iter()
            .flat_map(|w| &w.collections)
            .map(|c| c.runs_ingested)
            .sum()
    }

    /// Total runs skipped as already present.
    #[must_use]
    pub fn total_already_present(&self) -> u64 {
        self.workflows
            .iter()
            .flat_map(|w| &w.collections)
            .map(|c| c.runs_already_present)
            .sum()
    }

    /// Total runs that failed.
    #[must_use]
    pub fn total_failed(&self) -> u64 {
        self.workflows
            .iter()
            .flat_map(|w| &w.collections)
            .map(|c| c.failures.len() as u64)
            .sum()
    }
}
