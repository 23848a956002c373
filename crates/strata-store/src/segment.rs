//! Immutable columnar segments.
//!
//! A segment holds the rows committed for one run (or one join
//! recomputation) in column-major layout. Segments are write-once: a
//! commit writes the segment object at a unique key, then publishes it
//! by referencing it from the table manifest. A segment that never gets
//! referenced (because the manifest CAS lost and the run turned out to
//! be already ingested, or the commit failed) is invisible to readers
//! and reclaimed by vacuum.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Result, StoreError};
use crate::value::{Row, Value};

/// A column-major batch of rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Segment {
    /// Number of rows in every column.
    pub row_count: usize,
    /// Column name to cell values; all vectors have `row_count` entries.
    pub columns: BTreeMap<String, Vec<Value>>,
}

impl Segment {
    /// Builds a segment from row-major data.
    ///
    /// Columns are the union of the rows' keys; cells missing from a
    /// row are stored as null.
    #[must_use]
    pub fn from_rows(rows: &[Row]) -> Self {
        let mut names: Vec<&String> = Vec::new();
        let mut seen = std::collections::BTreeSet::new();
        for row in rows {
            for column in row.keys() {
                if seen.insert(column) {
                    names.push(column);
                }
            }
        }

        let mut columns: BTreeMap<String, Vec<Value>> = BTreeMap::new();
        for name in names {
            let cells = rows
                .iter()
                .map(|row| row.get(name).cloned().unwrap_or(Value::Null))
                .collect();
            columns.insert(name.clone(), cells);
        }

        Self {
            row_count: rows.len(),
            columns,
        }
    }

    /// Returns the column names present in this segment.
    #[must_use]
    pub fn column_names(&self) -> Vec<&String> {
        self.columns.keys().collect()
    }

    /// Materializes the segment into rows against a wider column set.
    ///
    /// Columns in `schema_columns` absent from the segment come back as
    /// null for every row, which is how historical segments observe
    /// schema that evolved after them.
    #[must_use]
    pub fn materialize(&self, schema_columns: &[String]) -> Vec<Row> {
        let mut rows = Vec::with_capacity(self.row_count);
        for i in 0..self.row_count {
            let mut row = Row::new();
            for column in schema_columns {
                let value = self
                    .columns
                    .get(column)
                    .and_then(|cells| cells.get(i))
                    .cloned()
                    .unwrap_or(Value::Null);
                row.insert(column.clone(), value);
            }
            rows.push(row);
        }
        rows
    }

    /// Encodes the segment for storage.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_bytes(&self) -> Result<Bytes> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| StoreError::Core(strata_core::Error::serialization(e.to_string())))
    }

    /// Decodes a segment read from storage.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupt`] if the bytes do not decode.
    pub fn from_bytes(key: &str, data: &[u8]) -> Result<Self> {
        let segment: Self = serde_json::from_slice(data).map_err(|e| StoreError::Corrupt {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        for (column, cells) in &segment.columns {
            if cells.len() != segment.row_count {
                return Err(StoreError::Corrupt {
                    key: key.to_string(),
                    message: format!(
                        "column '{column}' has {} cells, expected {}",
                        cells.len(),
                        segment.row_count
                    ),
                });
            }
        }
        Ok(segment)
    }
}
