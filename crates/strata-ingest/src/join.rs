//! Declarative cross-collection joins.
//!
//! A join reads its sources' aggregated tables (never raw files),
//! validates the key columns against post-ingestion schemas, and writes
//! the result as its own versioned table with lineage pinning each
//! source's version at join time. Staleness is a version-vector check:
//! the join recomputes iff any source version has advanced past the
//! recorded lineage.

use std::collections::BTreeMap;

use strata_config::{JoinConfig, JoinHow};
use strata_core::{CollectionId, CollectionTag, ScopedStorage};
use strata_store::{LineageSource, Row, TableSnapshot, TableStore, Value};

use crate::error::JoinError;
use crate::metrics;

/// Result of one join execution.
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    /// Version of the output table after the write.
    pub version: u64,
    /// Rows in the joined output.
    pub row_count: u64,
    /// Source versions the output was computed from.
    pub lineage: Vec<LineageSource>,
}

/// Executes joins between aggregated collection tables.
pub struct JoinExecutor {
    storage: ScopedStorage,
}

impl JoinExecutor {
    /// Creates an executor over the given catalog storage.
    #[must_use]
    pub fn new(storage: ScopedStorage) -> Self {
        Self { storage }
    }

    /// Returns the source collection ids of a join, base first.
    #[must_use]
    pub fn source_ids(base: &CollectionId, config: &JoinConfig) -> Vec<CollectionId> {
        let mut sources = vec![base.clone()];
        for target in &config.with {
            if let Ok(tag) = CollectionTag::new(target) {
                sources.push(CollectionId::new(base.workflow.clone(), tag));
            }
        }
        sources
    }

    /// Returns whether the join output is stale relative to its sources.
    ///
    /// An output that does not exist yet, or has no recorded lineage,
    /// is stale by definition.
    ///
    /// # Errors
    ///
    /// Returns an error if a source manifest cannot be read.
    pub async fn is_stale(
        &self,
        output: &CollectionId,
        sources: &[CollectionId],
    ) -> Result<bool, JoinError> {
        let output_table = TableStore::new(self.storage.clone(), output.clone());
        let manifest = match output_table.manifest().await {
            Ok(manifest) => manifest,
            Err(strata_store::StoreError::Core(e)) if e.is_not_found() => return Ok(true),
            Err(e) => return Err(e.into()),
        };

        let Some(lineage) = manifest.lineage else {
            return Ok(true);
        };
        let recorded: BTreeMap<&CollectionId, u64> =
            lineage.iter().map(|s| (&s.collection, s.version)).collect();

        for source in sources {
            let table = TableStore::new(self.storage.clone(), source.clone());
            let current = match table.manifest().await {
                Ok(manifest) => manifest.version,
                Err(strata_store::StoreError::Core(e)) if e.is_not_found() => 0,
                Err(e) => return Err(e.into()),
            };
            match recorded.get(source) {
                Some(&pinned) if current <= pinned => {}
                _ => return Ok(true),
            }
        }

        Ok(false)
    }

    /// Executes the join and writes the output table.
    ///
    /// # Errors
    ///
    /// Fails fast with [`JoinError::MissingJoinKey`] if a key column is
    /// absent from any source's schema, or [`JoinError::SourceNotReady`]
    /// if a source has not completed at least one ingestion. No partial
    /// join is ever written.
    pub async fn execute(
        &self,
        base: &CollectionId,
        config: &JoinConfig,
        output: &CollectionId,
    ) -> Result<JoinOutcome, JoinError> {
        let sources = Self::source_ids(base, config);

        let mut snapshots: Vec<(CollectionId, TableSnapshot)> = Vec::with_capacity(sources.len());
        for source in &sources {
            let table = TableStore::new(self.storage.clone(), source.clone());
            let manifest = match table.manifest().await {
                Ok(manifest) => manifest,
                Err(strata_store::StoreError::Core(e)) if e.is_not_found() => {
                    return Err(JoinError::SourceNotReady {
                        collection: source.to_string(),
                    });
                }
                Err(e) => return Err(e.into()),
            };
            if manifest.version == 0 {
                return Err(JoinError::SourceNotReady {
                    collection: source.to_string(),
                });
            }

            let snapshot = table.read().await?;

            // Every key must exist in every source before any work.
            for column in &config.on_columns {
                if !snapshot.schema.contains_key(column) {
                    return Err(JoinError::MissingJoinKey {
                        collection: source.to_string(),
                        column: column.clone(),
                    });
                }
            }

            snapshots.push((source.clone(), snapshot));
        }

        let lineage: Vec<LineageSource> = snapshots
            .iter()
            .map(|(id, snapshot)| LineageSource {
                collection: id.clone(),
                version: snapshot.version,
            })
            .collect();

        // The first snapshot is always the base collection.
        let mut rows = snapshots
            .first()
            .map(|(_, snapshot)| snapshot.rows.clone())
            .unwrap_or_default();

        for (source, snapshot) in snapshots.iter().skip(1) {
            rows = join_step(rows, snapshot, &source.tag, &config.on_columns, config.how);
        }

        let output_table = TableStore::new(self.storage.clone(), output.clone());
        let version = output_table.replace_contents(&rows, lineage.clone()).await?;

        metrics::record_join_recomputed(&output.to_string());
        tracing::info!(
            output = %output,
            version,
            rows = rows.len(),
            "join recomputed"
        );

        Ok(JoinOutcome {
            version,
            row_count: rows.len() as u64,
            lineage,
        })
    }
}

/// Joins accumulated rows against one target snapshot.
fn join_step(
    rows: Vec<Row>,
    target: &TableSnapshot,
    target_tag: &CollectionTag,
    on_columns: &[String],
    how: JoinHow,
) -> Vec<Row> {
    // Hash the target side by canonical key.
    let mut index: BTreeMap<String, Vec<&Row>> = BTreeMap::new();
    for row in &target.rows {
        if let Some(key) = join_key(row, on_columns) {
            index.entry(key).or_default().push(row);
        }
    }

    let target_columns: Vec<&String> = target
        .schema
        .keys()
        .filter(|c| !on_columns.contains(c))
        .collect();

    let mut out = Vec::new();
    for row in rows {
        let matches = join_key(&row, on_columns)
            .and_then(|key| index.get(&key))
            .map(Vec::as_slice)
            .unwrap_or_default();

        if matches.is_empty() {
            match how {
                JoinHow::Inner => {}
                JoinHow::Left => {
                    let mut merged = row.clone();
                    for column in &target_columns {
                        merged.insert(output_column(&merged, column, target_tag), Value::Null);
                    }
                    out.push(merged);
                }
            }
            continue;
        }

        for matched in matches {
            let mut merged = row.clone();
            for column in &target_columns {
                let value = matched.get(*column).cloned().unwrap_or(Value::Null);
                merged.insert(output_column(&merged, column, target_tag), value);
            }
            out.push(merged);
        }
    }
    out
}

/// Builds the canonical join key for a row; `None` if any key cell is
/// null, which can never match.
fn join_key(row: &Row, on_columns: &[String]) -> Option<String> {
    let mut parts = Vec::with_capacity(on_columns.len());
    for column in on_columns {
        let value = row.get(column)?;
        if value.is_null() {
            return None;
        }
        parts.push(value.canonical_repr());
    }
    Some(parts.join("\u{1f}"))
}

/// Resolves a target column's name in the output, prefixing with the
/// target tag on collision (provenance columns collide by design).
fn output_column(merged: &Row, column: &str, target_tag: &CollectionTag) -> String {
    if merged.contains_key(column) {
        format!("{target_tag}_{column}")
    } else {
        column.to_string()
    }
}
