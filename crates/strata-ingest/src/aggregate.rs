//! Idempotent per-run aggregation.
//!
//! The aggregator is the seam between parsed run data and the table
//! store: it stamps provenance columns onto every row and drives the
//! store's per-(collection, run) compare-and-commit. Runs already
//! present are reported as skipped, never re-processed; runs that fail
//! to commit are rolled back whole and surface in the result for the
//! next pass to retry.

use chrono::{DateTime, Utc};

use strata_core::RunId;
use strata_store::{AppendOutcome, Row, TableStore, Value, INGESTION_TIME_COLUMN, RUN_ID_COLUMN};

use crate::metrics;

/// Parsed rows for one run, ready to aggregate.
#[derive(Debug, Clone)]
pub struct ParsedRun {
    /// The run the rows came from.
    pub run_id: RunId,
    /// Normalized rows, without provenance columns.
    pub rows: Vec<Row>,
}

/// Outcome counts of one aggregation call.
#[derive(Debug, Clone, Default)]
pub struct AggregationResult {
    /// Runs newly committed in this call.
    pub ingested: u64,
    /// Runs skipped because they were already present.
    pub already_present: u64,
    /// Runs that failed to commit, with the failure reason.
    pub failed: Vec<(RunId, String)>,
    /// The table version after the last successful commit, if any.
    pub version: Option<u64>,
}

/// Aggregates parsed runs into a collection's table.
pub struct Aggregator {
    table: TableStore,
}

impl Aggregator {
    /// Creates an aggregator over the given table store.
    #[must_use]
    pub fn new(table: TableStore) -> Self {
        Self { table }
    }

    /// Returns the underlying table store.
    #[must_use]
    pub fn table(&self) -> &TableStore {
        &self.table
    }

    /// Aggregates the given runs, committing each at most once.
    ///
    /// Commit failures are per-run: the failed run is recorded in the
    /// result and the remaining runs still aggregate.
    pub async fn aggregate(
        &self,
        runs: Vec<ParsedRun>,
        ingested_at: DateTime<Utc>,
    ) -> AggregationResult {
        let mut result = AggregationResult::default();

        for parsed in runs {
            let rows = stamp_provenance(parsed.rows, &parsed.run_id, ingested_at);

            match self
                .table
                .append_run(parsed.run_id.clone(), &rows, ingested_at)
                .await
            {
                Ok(AppendOutcome::Committed { version, row_count }) => {
                    tracing::info!(
                        collection = %self.table.id(),
                        run = %parsed.run_id,
                        rows = row_count,
                        version,
                        "run ingested"
                    );
                    metrics::record_run_ingested(&self.table.id().to_string());
                    result.ingested += 1;
                    result.version = Some(version);
                }
                Ok(AppendOutcome::AlreadyIngested) => {
                    tracing::debug!(
                        collection = %self.table.id(),
                        run = %parsed.run_id,
                        "run already present"
                    );
                    metrics::record_run_skipped(&self.table.id().to_string());
                    result.already_present += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        collection = %self.table.id(),
                        run = %parsed.run_id,
                        error = %e,
                        "run commit failed, will retry next pass"
                    );
                    metrics::record_run_failed(&self.table.id().to_string());
                    result.failed.push((parsed.run_id, e.to_string()));
                }
            }
        }

        result
    }
}

/// Attaches the `run_id` and `ingestion_time` provenance columns.
fn stamp_provenance(mut rows: Vec<Row>, run_id: &RunId, ingested_at: DateTime<Utc>) -> Vec<Row> {
    let timestamp = ingested_at.to_rfc3339();
    for row in &mut rows {
        row.insert(
            RUN_ID_COLUMN.to_string(),
            Value::Str(run_id.as_str().to_string()),
        );
        row.insert(
            INGESTION_TIME_COLUMN.to_string(),
            Value::Str(timestamp.clone()),
        );
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use strata_core::storage::MemoryBackend;
    use strata_core::{CollectionId, CollectionTag, ScopedStorage, WorkflowName};

    fn table_store() -> TableStore {
        let storage =
            ScopedStorage::new(Arc::new(MemoryBackend::new()), "test").expect("scope");
        let id = CollectionId::new(
            WorkflowName::new("w").expect("name"),
            CollectionTag::new("metadata").expect("tag"),
        );
        TableStore::new(storage, id)
    }

    fn run(id: &str, rows: Vec<Row>) -> ParsedRun {
        ParsedRun {
            run_id: RunId::new(id).expect("run id"),
            rows,
        }
    }

    fn row(sample: &str) -> Row {
        Row::from([("sample".to_string(), Value::Str(sample.to_string()))])
    }

    #[tokio::test]
    async fn stamps_provenance_and_commits() {
        let table = table_store();
        table.ensure_exists().await.expect("ensure");
        let aggregator = Aggregator::new(table.clone());

        let result = aggregator
            .aggregate(vec![run("run-1", vec![row("s1"), row("s2")])], Utc::now())
            .await;

        assert_eq!(result.ingested, 1);
        assert_eq!(result.already_present, 0);
        assert!(result.failed.is_empty());

        let snapshot = table.read().await.expect("read");
        assert_eq!(snapshot.rows.len(), 2);
        assert_eq!(snapshot.rows[0][RUN_ID_COLUMN], Value::Str("run-1".into()));
        assert!(snapshot.schema.contains_key(INGESTION_TIME_COLUMN));
    }

    #[tokio::test]
    async fn second_pass_skips_ingested_runs() {
        let table = table_store();
        table.ensure_exists().await.expect("ensure");
        let aggregator = Aggregator::new(table.clone());

        let first = aggregator
            .aggregate(vec![run("run-1", vec![row("s1")])], Utc::now())
            .await;
        assert_eq!(first.ingested, 1);

        // Same run plus a new one: only the new one commits.
        let second = aggregator
            .aggregate(
                vec![run("run-1", vec![row("s1")]), run("run-2", vec![row("s2")])],
                Utc::now(),
            )
            .await;
        assert_eq!(second.ingested, 1);
        assert_eq!(second.already_present, 1);

        let manifest = table.manifest().await.expect("manifest");
        assert_eq!(manifest.runs.len(), 2);
    }
}
