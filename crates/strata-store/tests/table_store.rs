//! Integration tests for the table store's commit protocol.
//!
//! These cover the properties the rest of the pipeline leans on:
//! idempotent run commits, union-schema evolution, point-in-time reads,
//! concurrent same-run races, and orphan cleanup.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use strata_core::storage::MemoryBackend;
use strata_core::{CollectionId, CollectionTag, RunId, ScopedStorage, WorkflowName};
use strata_store::{AppendOutcome, ColumnType, Row, TableStore, Value};

fn scope() -> ScopedStorage {
    ScopedStorage::new(Arc::new(MemoryBackend::new()), "test").expect("scope")
}

fn collection(tag: &str) -> CollectionId {
    CollectionId::new(
        WorkflowName::new("w").expect("name"),
        CollectionTag::new(tag).expect("tag"),
    )
}

fn run(id: &str) -> RunId {
    RunId::new(id).expect("run id")
}

fn row(pairs: &[(&str, Value)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

#[tokio::test]
async fn append_then_read_roundtrip() {
    let store = TableStore::new(scope(), collection("metadata"));
    store.ensure_exists().await.expect("ensure");

    let rows = vec![
        row(&[("sample", Value::Str("s1".into())), ("habitat", Value::Str("soil".into()))]),
        row(&[("sample", Value::Str("s2".into())), ("habitat", Value::Str("marine".into()))]),
    ];

    let outcome = store
        .append_run(run("run-1"), &rows, Utc::now())
        .await
        .expect("append");
    assert_eq!(
        outcome,
        AppendOutcome::Committed {
            version: 1,
            row_count: 2
        }
    );

    let snapshot = store.read().await.expect("read");
    assert_eq!(snapshot.version, 1);
    assert_eq!(snapshot.rows.len(), 2);
    assert_eq!(snapshot.schema.get("sample"), Some(&ColumnType::Str));
}

#[tokio::test]
async fn same_run_is_ingested_at_most_once() {
    let store = TableStore::new(scope(), collection("metadata"));
    store.ensure_exists().await.expect("ensure");

    let rows = vec![row(&[("sample", Value::Str("s1".into()))])];

    let first = store
        .append_run(run("run-1"), &rows, Utc::now())
        .await
        .expect("append");
    assert!(matches!(first, AppendOutcome::Committed { .. }));

    let second = store
        .append_run(run("run-1"), &rows, Utc::now())
        .await
        .expect("append");
    assert_eq!(second, AppendOutcome::AlreadyIngested);

    let manifest = store.manifest().await.expect("manifest");
    assert_eq!(manifest.runs.len(), 1);
    assert_eq!(manifest.version, 1);
    assert_eq!(manifest.row_count(), 1);
}

#[tokio::test]
async fn schema_union_is_preserved_across_runs() {
    let store = TableStore::new(scope(), collection("metadata"));
    store.ensure_exists().await.expect("ensure");

    // Run A has {a, b}; run B has {b, c}.
    store
        .append_run(
            run("run-a"),
            &[row(&[("a", Value::Int(1)), ("b", Value::Int(2))])],
            Utc::now(),
        )
        .await
        .expect("append a");
    store
        .append_run(
            run("run-b"),
            &[row(&[("b", Value::Int(3)), ("c", Value::Int(4))])],
            Utc::now(),
        )
        .await
        .expect("append b");

    let snapshot = store.read().await.expect("read");
    let columns: Vec<_> = snapshot.schema.keys().cloned().collect();
    assert_eq!(columns, vec!["a", "b", "c"]);

    // Run A's `c` is null and run B's `a` is null.
    assert_eq!(snapshot.rows[0]["c"], Value::Null);
    assert_eq!(snapshot.rows[1]["a"], Value::Null);
    assert_eq!(snapshot.rows[0]["a"], Value::Int(1));
    assert_eq!(snapshot.rows[1]["c"], Value::Int(4));
}

#[tokio::test]
async fn point_in_time_read_excludes_later_runs() {
    let store = TableStore::new(scope(), collection("metadata"));
    store.ensure_exists().await.expect("ensure");

    store
        .append_run(run("run-1"), &[row(&[("a", Value::Int(1))])], Utc::now())
        .await
        .expect("append 1");
    store
        .append_run(
            run("run-2"),
            &[row(&[("a", Value::Int(2)), ("b", Value::Int(9))])],
            Utc::now(),
        )
        .await
        .expect("append 2");

    let past = store.read_at(1).await.expect("read_at");
    assert_eq!(past.version, 1);
    assert_eq!(past.rows.len(), 1);
    // Columns added by run-2 do not leak into the version-1 view.
    assert!(!past.schema.contains_key("b"));

    let current = store.read().await.expect("read");
    assert_eq!(current.rows.len(), 2);
    assert!(current.schema.contains_key("b"));
}

#[tokio::test]
async fn concurrent_workers_commit_a_run_exactly_once() {
    let storage = scope();
    let id = collection("metadata");
    let store = TableStore::new(storage.clone(), id.clone());
    store.ensure_exists().await.expect("ensure");

    let rows = vec![row(&[("sample", Value::Str("s1".into()))])];

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = TableStore::new(storage.clone(), id.clone());
            let rows = rows.clone();
            tokio::spawn(async move { store.append_run(run("run-1"), &rows, Utc::now()).await })
        })
        .collect();

    let mut committed = 0;
    let mut skipped = 0;
    for handle in handles {
        match handle.await.expect("join").expect("append") {
            AppendOutcome::Committed { .. } => committed += 1,
            AppendOutcome::AlreadyIngested => skipped += 1,
        }
    }

    assert_eq!(committed, 1, "exactly one worker commits the run");
    assert_eq!(skipped, 7);

    let manifest = store.manifest().await.expect("manifest");
    assert_eq!(manifest.runs.len(), 1);
    assert_eq!(manifest.row_count(), 1);
}

#[tokio::test]
async fn distinct_runs_all_commit_under_contention() {
    let storage = scope();
    let id = collection("metadata");
    let store = TableStore::new(storage.clone(), id.clone());
    store.ensure_exists().await.expect("ensure");

    let handles: Vec<_> = (0..6_i64)
        .map(|i| {
            let store = TableStore::new(storage.clone(), id.clone());
            tokio::spawn(async move {
                let rows = vec![row(&[("n", Value::Int(i))])];
                store
                    .append_run(run(&format!("run-{i}")), &rows, Utc::now())
                    .await
            })
        })
        .collect();

    for handle in handles {
        let outcome = handle.await.expect("join").expect("append");
        assert!(matches!(outcome, AppendOutcome::Committed { .. }));
    }

    let manifest = store.manifest().await.expect("manifest");
    assert_eq!(manifest.runs.len(), 6);
    assert_eq!(manifest.version, 6);
}

#[tokio::test]
async fn vacuum_removes_only_old_orphans() {
    let storage = scope();
    let id = collection("metadata");
    let store = TableStore::new(storage.clone(), id.clone());
    store.ensure_exists().await.expect("ensure");

    store
        .append_run(run("run-1"), &[row(&[("a", Value::Int(1))])], Utc::now())
        .await
        .expect("append");

    // Plant an orphan segment by hand.
    let orphan_key = storage.segment_key(&id, "orphan-abc");
    storage
        .put(
            &orphan_key,
            bytes::Bytes::from_static(br#"{"rowCount":0,"columns":{}}"#),
            strata_core::WritePrecondition::None,
        )
        .await
        .expect("plant orphan");

    // Within the grace window nothing is removed.
    let removed = store.vacuum(Duration::from_secs(3600)).await.expect("vacuum");
    assert_eq!(removed, 0);

    // With no grace the orphan goes and the live segment stays.
    let removed = store.vacuum(Duration::ZERO).await.expect("vacuum");
    assert_eq!(removed, 1);

    let snapshot = store.read().await.expect("read");
    assert_eq!(snapshot.rows.len(), 1);
}

#[tokio::test]
async fn replace_contents_versions_join_outputs() {
    let store = TableStore::new(scope(), collection("joined"));

    let v1 = store
        .replace_contents(
            &[row(&[("k", Value::Int(1)), ("x", Value::Int(10))])],
            vec![],
        )
        .await
        .expect("replace 1");
    assert_eq!(v1, 1);

    let v2 = store
        .replace_contents(
            &[
                row(&[("k", Value::Int(1)), ("x", Value::Int(10))]),
                row(&[("k", Value::Int(2)), ("x", Value::Int(20))]),
            ],
            vec![],
        )
        .await
        .expect("replace 2");
    assert_eq!(v2, 2);

    // Current state is the second output only.
    let current = store.read().await.expect("read");
    assert_eq!(current.rows.len(), 2);

    // The first output remains readable at its version.
    let past = store.read_at(1).await.expect("read_at");
    assert_eq!(past.rows.len(), 1);
}

#[tokio::test]
async fn provenance_columns_flow_through_storage() {
    let store = TableStore::new(scope(), collection("metadata"));
    store.ensure_exists().await.expect("ensure");

    let mut r: Row = BTreeMap::new();
    r.insert("sample".into(), Value::Str("s1".into()));
    r.insert(strata_store::RUN_ID_COLUMN.into(), Value::Str("run-1".into()));
    r.insert(
        strata_store::INGESTION_TIME_COLUMN.into(),
        Value::Str(Utc::now().to_rfc3339()),
    );

    store
        .append_run(run("run-1"), &[r], Utc::now())
        .await
        .expect("append");

    let snapshot = store.read().await.expect("read");
    assert_eq!(snapshot.schema.len(), 3);
    assert_eq!(
        snapshot.rows[0][strata_store::RUN_ID_COLUMN],
        Value::Str("run-1".into())
    );
}
