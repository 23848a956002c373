//! Delimited tabular reader.

use async_trait::async_trait;

use strata_config::{CollectionConfig, ParseOptions};
use strata_core::StorageBackend;
use strata_store::{Row, Value};

use crate::error::ReadError;

use super::FormatReader;

/// Reader for delimited text files (TSV, CSV, and friends).
///
/// The header row is taken after skipping `skip_rows` leading records;
/// cells are type-coerced, and an optional `keep_columns` allow-list is
/// projected after the read.
#[derive(Debug, Clone)]
pub struct TabularReader {
    separator: u8,
    skip_rows: usize,
    keep_columns: Option<Vec<String>>,
}

impl TabularReader {
    /// Creates a reader with explicit options.
    #[must_use]
    pub fn new(options: &ParseOptions, keep_columns: Option<Vec<String>>) -> Self {
        Self {
            separator: u8::try_from(u32::from(options.separator)).unwrap_or(b'\t'),
            skip_rows: options.skip_rows,
            keep_columns,
        }
    }

    /// Creates a reader from a collection's configuration.
    #[must_use]
    pub fn from_collection(collection: &CollectionConfig) -> Self {
        Self::new(&collection.parse_options(), collection.keep_columns.clone())
    }
}

#[async_trait]
impl FormatReader for TabularReader {
    async fn read(&self, source: &dyn StorageBackend, path: &str) -> Result<Vec<Row>, ReadError> {
        let data = source
            .get(path)
            .await
            .map_err(|source| ReadError::UnreadableFile {
                path: path.to_string(),
                source,
            })?;

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.separator)
            .has_headers(false)
            .flexible(true)
            .from_reader(data.as_ref());

        let mut records = reader.records().skip(self.skip_rows);

        let header = match records.next() {
            Some(Ok(record)) => record
                .iter()
                .map(|h| h.trim().to_string())
                .collect::<Vec<_>>(),
            Some(Err(e)) => {
                return Err(ReadError::UnreadableFile {
                    path: path.to_string(),
                    source: strata_core::Error::InvalidInput(format!("malformed header: {e}")),
                });
            }
            None => {
                return Err(ReadError::EmptyResult {
                    path: path.to_string(),
                });
            }
        };

        // The projection must be checkable against the header before
        // any row is materialized.
        if let Some(keep) = &self.keep_columns {
            let missing: Vec<String> = keep
                .iter()
                .filter(|k| !header.iter().any(|h| h == *k))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(ReadError::SchemaMismatch {
                    path: path.to_string(),
                    missing,
                });
            }
        }

        let mut rows = Vec::new();
        for record in records {
            let record = record.map_err(|e| ReadError::UnreadableFile {
                path: path.to_string(),
                source: strata_core::Error::InvalidInput(format!("malformed record: {e}")),
            })?;

            let mut row = Row::new();
            for (idx, column) in header.iter().enumerate() {
                if column.is_empty() {
                    continue;
                }
                if let Some(keep) = &self.keep_columns {
                    if !keep.iter().any(|k| k == column) {
                        continue;
                    }
                }
                let cell = record.get(idx).unwrap_or("");
                row.insert(column.clone(), Value::from_cell(cell));
            }
            rows.push(row);
        }

        if rows.is_empty() {
            return Err(ReadError::EmptyResult {
                path: path.to_string(),
            });
        }

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use strata_core::storage::MemoryBackend;
    use strata_core::WritePrecondition;

    async fn backend_with(path: &str, content: &str) -> MemoryBackend {
        let backend = MemoryBackend::new();
        backend
            .put(
                path,
                Bytes::from(content.to_string()),
                WritePrecondition::None,
            )
            .await
            .expect("seed");
        backend
    }

    fn reader(keep: Option<Vec<String>>) -> TabularReader {
        TabularReader::new(&ParseOptions::default(), keep)
    }

    #[tokio::test]
    async fn reads_tsv_with_typed_cells() {
        let backend =
            backend_with("meta.tsv", "sample\thabitat\tdepth\ns1\tsoil\t1.5\ns2\tmarine\t30\n")
                .await;

        let rows = reader(None).read(&backend, "meta.tsv").await.expect("read");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["sample"], Value::Str("s1".into()));
        assert_eq!(rows[0]["depth"], Value::Float(1.5));
        assert_eq!(rows[1]["depth"], Value::Int(30));
    }

    #[tokio::test]
    async fn keep_columns_projects_after_read() {
        let backend =
            backend_with("meta.tsv", "sample\thabitat\textra\ns1\tsoil\tx\n").await;

        let rows = reader(Some(vec!["sample".into(), "habitat".into()]))
            .read(&backend, "meta.tsv")
            .await
            .expect("read");
        assert_eq!(rows[0].len(), 2);
        assert!(rows[0].contains_key("sample"));
        assert!(!rows[0].contains_key("extra"));
    }

    #[tokio::test]
    async fn missing_keep_column_is_schema_mismatch() {
        let backend = backend_with("meta.tsv", "sample\ns1\n").await;

        let err = reader(Some(vec!["sample".into(), "habitat".into()]))
            .read(&backend, "meta.tsv")
            .await
            .expect_err("must fail");
        match err {
            ReadError::SchemaMismatch { missing, .. } => {
                assert_eq!(missing, vec!["habitat".to_string()]);
            }
            other => panic!("expected SchemaMismatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn header_only_file_is_empty_result() {
        let backend = backend_with("meta.tsv", "sample\thabitat\n").await;

        let err = reader(None)
            .read(&backend, "meta.tsv")
            .await
            .expect_err("must fail");
        assert!(matches!(err, ReadError::EmptyResult { .. }));
    }

    #[tokio::test]
    async fn missing_file_is_unreadable() {
        let backend = MemoryBackend::new();
        let err = reader(None)
            .read(&backend, "gone.tsv")
            .await
            .expect_err("must fail");
        assert!(matches!(err, ReadError::UnreadableFile { .. }));
    }

    #[tokio::test]
    async fn skip_rows_offsets_the_header() {
        let backend = backend_with(
            "meta.tsv",
            "# produced by pipeline v3\nsample\thabitat\ns1\tsoil\n",
        )
        .await;

        let options = ParseOptions {
            separator: '\t',
            skip_rows: 1,
        };
        let rows = TabularReader::new(&options, None)
            .read(&backend, "meta.tsv")
            .await
            .expect("read");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["habitat"], Value::Str("soil".into()));
    }

    #[tokio::test]
    async fn short_records_null_fill() {
        let backend = backend_with("meta.tsv", "a\tb\n1\n").await;

        let rows = reader(None).read(&backend, "meta.tsv").await.expect("read");
        assert_eq!(rows[0]["a"], Value::Int(1));
        assert_eq!(rows[0]["b"], Value::Null);
    }

    #[tokio::test]
    async fn comma_separator() {
        let backend = backend_with("meta.csv", "a,b\n1,2\n").await;

        let options = ParseOptions {
            separator: ',',
            skip_rows: 0,
        };
        let rows = TabularReader::new(&options, None)
            .read(&backend, "meta.csv")
            .await
            .expect("read");
        assert_eq!(rows[0]["b"], Value::Int(2));
    }
}
