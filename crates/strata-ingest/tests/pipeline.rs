//! End-to-end pipeline tests over an in-memory source tree.
//!
//! These exercise the documented pipeline properties: the concrete
//! metadata scenario, idempotence across passes, incremental runs,
//! per-run failure isolation, join staleness, and catalog registration.

use std::sync::Arc;

use bytes::Bytes;

use strata_catalog::Registrar;
use strata_config::StrataConfig;
use strata_core::storage::MemoryBackend;
use strata_core::{
    CollectionId, CollectionTag, ScopedStorage, StorageBackend, WorkflowName, WritePrecondition,
};
use strata_ingest::{JoinOutcomeReport, PassRunner};
use strata_store::{TableStore, Value};

async fn seed(source: &Arc<MemoryBackend>, files: &[(&str, &str)]) {
    for (path, content) in files {
        source
            .put(
                path,
                Bytes::from(content.to_string()),
                WritePrecondition::None,
            )
            .await
            .expect("seed");
    }
}

fn metadata_config() -> StrataConfig {
    StrataConfig::parse(
        r#"{
            "workflows": [{
                "name": "w",
                "engine": "snakemake",
                "locations": ["data/w"],
                "runPattern": "run-(?P<id>\\d+)",
                "collections": [{
                    "tag": "metadata",
                    "type": "table",
                    "pattern": "*.tsv",
                    "keepColumns": ["sample", "habitat"]
                }]
            }]
        }"#,
    )
    .expect("config")
}

fn collection(tag: &str) -> CollectionId {
    CollectionId::new(
        WorkflowName::new("w").expect("name"),
        CollectionTag::new(tag).expect("tag"),
    )
}

fn runner(source: &Arc<MemoryBackend>, storage: &ScopedStorage, config: StrataConfig) -> PassRunner {
    PassRunner::new(source.clone(), storage.clone(), config)
}

/// The concrete scenario: one run with an extra column beyond the
/// keep-list ingests with 2 declared + 2 provenance columns; adding a
/// second run later adds exactly one run without touching the first.
#[tokio::test]
async fn metadata_scenario_end_to_end() {
    let source = Arc::new(MemoryBackend::new());
    seed(
        &source,
        &[(
            "data/w/run-1/meta.tsv",
            "sample\thabitat\textra\ns1\tsoil\tx\ns2\tmarine\ty\n",
        )],
    )
    .await;

    let storage = ScopedStorage::new(Arc::new(MemoryBackend::new()), "prod").expect("scope");
    let config = metadata_config();

    let report = runner(&source, &storage, config.clone())
        .run()
        .await
        .expect("pass");
    assert_eq!(report.total_ingested(), 1);
    assert_eq!(report.total_already_present(), 0);
    assert_eq!(report.total_failed(), 0);

    let table = TableStore::new(storage.clone(), collection("metadata"));
    let snapshot = table.read().await.expect("read");
    assert_eq!(snapshot.rows.len(), 2);
    // 2 declared columns + run_id + ingestion_time; `extra` projected out.
    assert_eq!(snapshot.schema.len(), 4);
    assert!(snapshot.schema.contains_key("sample"));
    assert!(snapshot.schema.contains_key("habitat"));
    assert!(snapshot.schema.contains_key("run_id"));
    assert!(snapshot.schema.contains_key("ingestion_time"));
    assert!(!snapshot.schema.contains_key("extra"));

    // Second pass with an added run-2 ingests exactly one new run.
    seed(
        &source,
        &[("data/w/run-2/meta.tsv", "sample\thabitat\ns3\tair\n")],
    )
    .await;

    let report = runner(&source, &storage, config)
        .run()
        .await
        .expect("pass");
    assert_eq!(report.total_ingested(), 1);
    assert_eq!(report.total_already_present(), 1);

    let snapshot = table.read().await.expect("read");
    assert_eq!(snapshot.rows.len(), 3);
    let run1_rows: Vec<_> = snapshot
        .rows
        .iter()
        .filter(|r| r["run_id"] == Value::Str("1".into()))
        .collect();
    assert_eq!(run1_rows.len(), 2, "run-1 rows untouched");

    let manifest = table.manifest().await.expect("manifest");
    assert_eq!(manifest.runs.len(), 2);
}

/// Running the same pass twice against an unchanged tree is a no-op:
/// identical catalog state, zero newly ingested runs.
#[tokio::test]
async fn passes_are_idempotent() {
    let source = Arc::new(MemoryBackend::new());
    seed(
        &source,
        &[
            ("data/w/run-1/meta.tsv", "sample\thabitat\ns1\tsoil\n"),
            ("data/w/run-2/meta.tsv", "sample\thabitat\ns2\tmarine\n"),
        ],
    )
    .await;

    let storage = ScopedStorage::new(Arc::new(MemoryBackend::new()), "prod").expect("scope");
    let config = metadata_config();

    let first = runner(&source, &storage, config.clone())
        .run()
        .await
        .expect("pass");
    assert_eq!(first.total_ingested(), 2);

    let registrar = Registrar::new(storage.clone());
    let entry_after_first = registrar
        .get(&collection("metadata"))
        .await
        .expect("get")
        .expect("registered");

    let second = runner(&source, &storage, config)
        .run()
        .await
        .expect("pass");
    assert_eq!(second.total_ingested(), 0);
    assert_eq!(second.total_already_present(), 2);

    let entry_after_second = registrar
        .get(&collection("metadata"))
        .await
        .expect("get")
        .expect("registered");

    // Catalog state identical: no version churn on a no-op pass.
    assert_eq!(entry_after_second.version, entry_after_first.version);
    assert_eq!(
        entry_after_second.table_version,
        entry_after_first.table_version
    );
}

/// A run whose file fails to parse is excluded and reported, while
/// other runs ingest normally; the failed run succeeds on a later pass
/// once the file is fixed.
#[tokio::test]
async fn failed_runs_are_isolated_and_retried() {
    let source = Arc::new(MemoryBackend::new());
    seed(
        &source,
        &[
            ("data/w/run-1/meta.tsv", "sample\thabitat\ns1\tsoil\n"),
            // run-2 lacks the declared keep columns entirely.
            ("data/w/run-2/meta.tsv", "other\nx\n"),
        ],
    )
    .await;

    let storage = ScopedStorage::new(Arc::new(MemoryBackend::new()), "prod").expect("scope");
    let config = metadata_config();

    let report = runner(&source, &storage, config.clone())
        .run()
        .await
        .expect("pass");
    assert_eq!(report.total_ingested(), 1);
    assert_eq!(report.total_failed(), 1);
    let failure = &report.workflows[0].collections[0].failures[0];
    assert_eq!(failure.run_id.as_str(), "2");
    assert!(failure.reason.contains("missing"));

    // Fix the file; the next pass ingests run-2 and only run-2.
    seed(
        &source,
        &[("data/w/run-2/meta.tsv", "sample\thabitat\ns2\tmarine\n")],
    )
    .await;

    let report = runner(&source, &storage, config)
        .run()
        .await
        .expect("pass");
    assert_eq!(report.total_ingested(), 1);
    assert_eq!(report.total_already_present(), 1);
    assert_eq!(report.total_failed(), 0);
}

fn joined_config() -> StrataConfig {
    StrataConfig::parse(
        r#"{
            "workflows": [{
                "name": "w",
                "engine": "nextflow",
                "locations": ["data/w"],
                "runPattern": "run-(?P<id>\\d+)",
                "collections": [{
                    "tag": "metadata",
                    "type": "table",
                    "pattern": "*.tsv"
                }, {
                    "tag": "counts",
                    "type": "table",
                    "pattern": "counts/{sample}.tsv",
                    "wildcards": [{"name": "sample"}],
                    "join": {"onColumns": ["sample"], "how": "inner", "with": ["metadata"]}
                }]
            }]
        }"#,
    )
    .expect("config")
}

/// Joins recompute when stale, stay put when fresh, and re-run with
/// advanced lineage after sources move.
#[tokio::test]
async fn joins_follow_source_staleness() {
    let source = Arc::new(MemoryBackend::new());
    seed(
        &source,
        &[
            ("data/w/run-1/meta.tsv", "sample\thabitat\ns1\tsoil\n"),
            ("data/w/run-1/counts/s1.tsv", "gene\tcount\ng1\t5\ng2\t7\n"),
        ],
    )
    .await;

    let storage = ScopedStorage::new(Arc::new(MemoryBackend::new()), "prod").expect("scope");
    let config = joined_config();

    let report = runner(&source, &storage, config.clone())
        .run()
        .await
        .expect("pass");
    let join = &report.workflows[0].joins[0];
    assert_eq!(join.output_tag, "counts_joined");
    let first_version = match &join.outcome {
        JoinOutcomeReport::Recomputed { version, rows } => {
            assert_eq!(*rows, 2, "both count rows match s1");
            *version
        }
        other => panic!("expected recompute, got {other:?}"),
    };

    // Joined rows carry columns from both sides; the capture column
    // `sample` is the key.
    let joined = TableStore::new(storage.clone(), collection("counts_joined"));
    let snapshot = joined.read().await.expect("read");
    assert_eq!(snapshot.rows.len(), 2);
    assert!(snapshot.schema.contains_key("habitat"));
    assert!(snapshot.schema.contains_key("count"));

    // Unchanged tree: the join is up to date on the next pass.
    let report = runner(&source, &storage, config.clone())
        .run()
        .await
        .expect("pass");
    assert!(matches!(
        report.workflows[0].joins[0].outcome,
        JoinOutcomeReport::UpToDate
    ));

    // A new run advances the sources; the join recomputes at a higher
    // version with updated lineage.
    seed(
        &source,
        &[
            ("data/w/run-2/meta.tsv", "sample\thabitat\ns2\tmarine\n"),
            ("data/w/run-2/counts/s2.tsv", "gene\tcount\ng1\t9\n"),
        ],
    )
    .await;

    let report = runner(&source, &storage, config)
        .run()
        .await
        .expect("pass");
    match &report.workflows[0].joins[0].outcome {
        JoinOutcomeReport::Recomputed { version, rows } => {
            assert!(*version > first_version);
            assert_eq!(*rows, 3);
        }
        other => panic!("expected recompute, got {other:?}"),
    }

    let manifest = joined.manifest().await.expect("manifest");
    let lineage = manifest.lineage.expect("lineage");
    for source_pin in &lineage {
        assert_eq!(source_pin.version, 2, "lineage pins the advanced sources");
    }
}

/// Catalog entries are registered for collections and join outputs,
/// with schema and pointer visible to consumers.
#[tokio::test]
async fn catalog_entries_are_published() {
    let source = Arc::new(MemoryBackend::new());
    seed(
        &source,
        &[
            ("data/w/run-1/meta.tsv", "sample\thabitat\ns1\tsoil\n"),
            ("data/w/run-1/counts/s1.tsv", "gene\tcount\ng1\t5\n"),
        ],
    )
    .await;

    let storage = ScopedStorage::new(Arc::new(MemoryBackend::new()), "prod").expect("scope");

    runner(&source, &storage, joined_config())
        .run()
        .await
        .expect("pass");

    let registrar = Registrar::new(storage.clone());
    let entries = registrar.list_entries().await.expect("list");
    let tags: Vec<_> = entries.iter().map(|e| e.id.tag.to_string()).collect();
    assert_eq!(tags, vec!["counts", "counts_joined", "metadata"]);

    let joined = entries
        .iter()
        .find(|e| e.id.tag.to_string() == "counts_joined")
        .expect("joined entry");
    assert!(joined.is_derived());
    let lineage = joined.lineage.as_ref().expect("lineage");
    assert_eq!(lineage.len(), 2);
    assert!(joined.storage_pointer.ends_with("manifest.json"));

    let metadata = entries
        .iter()
        .find(|e| e.id.tag.to_string() == "metadata")
        .expect("metadata entry");
    assert!(metadata.schema.contains_key("habitat"));
    assert!(metadata.schema.contains_key("run_id"));
}

/// Discovery misses are reported per (run, collection) without
/// blocking the collections that did match.
#[tokio::test]
async fn discovery_misses_are_reported() {
    let source = Arc::new(MemoryBackend::new());
    seed(
        &source,
        &[("data/w/run-1/meta.tsv", "sample\thabitat\ns1\tsoil\n")],
    )
    .await;

    let storage = ScopedStorage::new(Arc::new(MemoryBackend::new()), "prod").expect("scope");

    let report = runner(&source, &storage, joined_config())
        .run()
        .await
        .expect("pass");

    let collections = &report.workflows[0].collections;
    let counts = collections
        .iter()
        .find(|c| c.tag == "counts")
        .expect("counts report");
    assert_eq!(counts.discovery_misses, 1);
    assert_eq!(counts.runs_ingested, 0);

    let metadata = collections
        .iter()
        .find(|c| c.tag == "metadata")
        .expect("metadata report");
    assert_eq!(metadata.runs_ingested, 1);
}

/// A cancelled pass stops at unit boundaries and reports itself
/// cancelled instead of failing.
#[tokio::test]
async fn cancellation_is_clean() {
    let source = Arc::new(MemoryBackend::new());
    seed(
        &source,
        &[("data/w/run-1/meta.tsv", "sample\thabitat\ns1\tsoil\n")],
    )
    .await;

    let storage = ScopedStorage::new(Arc::new(MemoryBackend::new()), "prod").expect("scope");
    let runner = runner(&source, &storage, metadata_config());

    runner.cancellation_token().cancel();
    let report = runner.run().await.expect("pass");
    assert!(report.cancelled);
    assert_eq!(report.total_ingested(), 0);

    // A fresh pass completes the work the cancelled one skipped.
    let runner = PassRunner::new(source, storage, metadata_config());
    let report = runner.run().await.expect("pass");
    assert!(!report.cancelled);
    assert_eq!(report.total_ingested(), 1);
}
