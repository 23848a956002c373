//! # strata-store
//!
//! The versioned, transactional, columnar table store backing strata
//! collections.
//!
//! Each collection owns one CAS-committed manifest plus a set of
//! immutable column-major segments. A run append is transactional: the
//! segment object is written first at a unique key, and only the
//! manifest commit publishes it — readers observe whole runs or nothing.
//! The manifest also carries the run-membership set that makes
//! ingestion idempotent and the lineage pins that drive join staleness
//! checks.

pub mod error;
pub mod manifest;
pub mod segment;
pub mod table;
pub mod value;

pub use error::{Result, StoreError};
pub use manifest::{IngestionRecord, LineageSource, SegmentRef, TableManifest};
pub use segment::Segment;
pub use table::{AppendOutcome, TableSnapshot, TableStore, DEFAULT_VACUUM_GRACE};
pub use value::{infer_schema, merge_schema, ColumnType, Row, Schema, Value};

/// Name of the run provenance column attached to every ingested row.
pub const RUN_ID_COLUMN: &str = "run_id";

/// Name of the timestamp provenance column attached to every ingested row.
pub const INGESTION_TIME_COLUMN: &str = "ingestion_time";
