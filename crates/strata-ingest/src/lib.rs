//! # strata-ingest
//!
//! The ingestion pipeline: run discovery over storage roots, pluggable
//! format readers, idempotent per-run aggregation into versioned
//! tables, declarative joins, and catalog registration — orchestrated
//! by a cancellable, bounded-concurrency pass runner.
//!
//! The flow per pass:
//!
//! ```text
//! configuration → discoverer → readers → aggregator → joins → registrar
//! ```
//!
//! Failures are granular: per-file read errors exclude their run for
//! the pass, per-run commit conflicts roll the run back whole, join
//! failures stay scoped to the join, and everything lands in the
//! [`report::PassReport`] rather than aborting the batch.

pub mod aggregate;
pub mod discover;
pub mod error;
pub mod join;
pub mod metrics;
pub mod pass;
pub mod readers;
pub mod report;

pub use aggregate::{AggregationResult, Aggregator, ParsedRun};
pub use discover::{
    DiscoveredFile, DiscoveredRun, DiscoveryMiss, RunDiscoverer, RunDiscovery, UnresolvedLink,
    WorkflowDiscovery,
};
pub use error::{IngestError, JoinError, ReadError, Result};
pub use join::{JoinExecutor, JoinOutcome};
pub use pass::{PassOptions, PassRunner};
pub use readers::{reader_for, FormatReader, JBrowseReader, TabularReader};
pub use report::{
    CollectionReport, JoinOutcomeReport, JoinReport, PassReport, RunFailure, WorkflowReport,
};
