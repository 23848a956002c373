//! Ingestion metrics.
//!
//! Counters and histograms for pass outcomes, complementing the
//! structured logging. Recorded through the `metrics` facade; wire up
//! an exporter at application startup to publish them.

use metrics::{counter, describe_counter, describe_histogram, histogram};

/// Runs newly ingested.
pub const RUNS_INGESTED: &str = "strata_runs_ingested_total";

/// Runs skipped as already present.
pub const RUNS_SKIPPED: &str = "strata_runs_skipped_total";

/// Runs that failed to read or commit.
pub const RUNS_FAILED: &str = "strata_runs_failed_total";

/// Joins recomputed.
pub const JOINS_RECOMPUTED: &str = "strata_joins_recomputed_total";

/// Pass duration in seconds.
pub const PASS_DURATION: &str = "strata_pass_duration_seconds";

/// Registers all ingestion metric descriptions.
///
/// Call once at application startup after installing a recorder.
pub fn register_metrics() {
    describe_counter!(RUNS_INGESTED, "Total runs newly ingested");
    describe_counter!(RUNS_SKIPPED, "Total runs skipped as already present");
    describe_counter!(RUNS_FAILED, "Total runs that failed to read or commit");
    describe_counter!(JOINS_RECOMPUTED, "Total join recomputations");
    describe_histogram!(PASS_DURATION, "Duration of ingestion passes in seconds");
}

/// Records a newly ingested run.
pub fn record_run_ingested(collection: &str) {
    counter!(RUNS_INGESTED, "collection" => collection.to_string()).increment(1);
}

/// Records a run skipped as already present.
pub fn record_run_skipped(collection: &str) {
    counter!(RUNS_SKIPPED, "collection" => collection.to_string()).increment(1);
}

/// Records a run that failed to read or commit.
pub fn record_run_failed(collection: &str) {
    counter!(RUNS_FAILED, "collection" => collection.to_string()).increment(1);
}

/// Records a join recomputation.
pub fn record_join_recomputed(collection: &str) {
    counter!(JOINS_RECOMPUTED, "collection" => collection.to_string()).increment(1);
}

/// Records the duration of a completed pass.
pub fn record_pass_duration(seconds: f64) {
    histogram!(PASS_DURATION).record(seconds);
}
