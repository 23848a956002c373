//! Cell values and column types.
//!
//! Ingested files are heterogeneous: the same column may appear as an
//! integer in one run and a float in another, or be missing entirely.
//! The value model keeps cells loosely typed while the schema tracks a
//! unified semantic type per column, widening as new runs arrive.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single cell value.
///
/// Serialized as plain JSON scalars, so segments stay readable by any
/// JSON tooling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Missing or empty cell.
    Null,
    /// Boolean cell.
    Bool(bool),
    /// Integer cell.
    Int(i64),
    /// Floating-point cell.
    Float(f64),
    /// Text cell.
    Str(String),
}

impl Value {
    /// Coerces a raw text cell into a typed value.
    ///
    /// Empty (after trimming) becomes null; `true`/`false` (case
    /// insensitive) become booleans; integer and float literals become
    /// numbers; everything else stays text.
    #[must_use]
    pub fn from_cell(cell: &str) -> Self {
        let trimmed = cell.trim();
        if trimmed.is_empty() {
            return Self::Null;
        }
        if trimmed.eq_ignore_ascii_case("true") {
            return Self::Bool(true);
        }
        if trimmed.eq_ignore_ascii_case("false") {
            return Self::Bool(false);
        }
        if let Ok(i) = trimmed.parse::<i64>() {
            return Self::Int(i);
        }
        if let Ok(f) = trimmed.parse::<f64>() {
            if f.is_finite() {
                return Self::Float(f);
            }
        }
        Self::Str(trimmed.to_string())
    }

    /// Returns true if this is the null value.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the column type of this value, or `None` for null.
    #[must_use]
    pub const fn column_type(&self) -> Option<ColumnType> {
        match self {
            Self::Null => None,
            Self::Bool(_) => Some(ColumnType::Bool),
            Self::Int(_) => Some(ColumnType::Int),
            Self::Float(_) => Some(ColumnType::Float),
            Self::Str(_) => Some(ColumnType::Str),
        }
    }

    /// Returns an unambiguous canonical representation with a type tag
    /// and length prefix, suitable for composing hash-join keys.
    #[must_use]
    pub fn canonical_repr(&self) -> String {
        match self {
            Self::Null => "n:".to_string(),
            Self::Bool(b) => format!("b:{b}"),
            Self::Int(i) => format!("i:{i}"),
            Self::Float(f) => format!("f:{f}"),
            Self::Str(s) => format!("s:{}:{s}", s.len()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str(""),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

/// Semantic type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    /// Boolean column.
    Bool,
    /// Integer column.
    Int,
    /// Floating-point column.
    Float,
    /// Text column.
    Str,
}

impl ColumnType {
    /// Unifies two column types, widening where needed.
    ///
    /// Equal types stay; `Int` and `Float` widen to `Float`; any other
    /// mix degrades to `Str`.
    #[must_use]
    pub const fn unify(self, other: Self) -> Self {
        match (self, other) {
            (Self::Bool, Self::Bool) => Self::Bool,
            (Self::Int, Self::Int) => Self::Int,
            (Self::Float | Self::Int, Self::Float) | (Self::Float, Self::Int) => Self::Float,
            _ => Self::Str,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Str => "str",
        };
        f.write_str(s)
    }
}

/// A single row: column name to cell value.
pub type Row = BTreeMap<String, Value>;

/// Column name to semantic type.
pub type Schema = BTreeMap<String, ColumnType>;

/// Infers the schema of a set of rows.
///
/// Each column's type is the unification of its non-null values; a
/// column that is null everywhere defaults to text.
#[must_use]
pub fn infer_schema(rows: &[Row]) -> Schema {
    let mut schema: BTreeMap<String, Option<ColumnType>> = BTreeMap::new();
    for row in rows {
        for (column, value) in row {
            let slot = schema.entry(column.clone()).or_insert(None);
            if let Some(t) = value.column_type() {
                *slot = Some(match slot {
                    Some(existing) => existing.unify(t),
                    None => t,
                });
            }
        }
    }
    schema
        .into_iter()
        .map(|(column, t)| (column, t.unwrap_or(ColumnType::Str)))
        .collect()
}

/// Merges `other` into `schema`, unifying overlapping column types.
pub fn merge_schema(schema: &mut Schema, other: &Schema) {
    for (column, &t) in other {
        schema
            .entry(column.clone())
            .and_modify(|existing| *existing = existing.unify(t))
            .or_insert(t);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_coercion() {
        assert_eq!(Value::from_cell(""), Value::Null);
        assert_eq!(Value::from_cell("  "), Value::Null);
        assert_eq!(Value::from_cell("TRUE"), Value::Bool(true));
        assert_eq!(Value::from_cell("false"), Value::Bool(false));
        assert_eq!(Value::from_cell("42"), Value::Int(42));
        assert_eq!(Value::from_cell("-3"), Value::Int(-3));
        assert_eq!(Value::from_cell("2.5"), Value::Float(2.5));
        assert_eq!(Value::from_cell("soil"), Value::Str("soil".into()));
    }

    #[test]
    fn type_unification_widens() {
        assert_eq!(ColumnType::Int.unify(ColumnType::Int), ColumnType::Int);
        assert_eq!(ColumnType::Int.unify(ColumnType::Float), ColumnType::Float);
        assert_eq!(ColumnType::Float.unify(ColumnType::Int), ColumnType::Float);
        assert_eq!(ColumnType::Bool.unify(ColumnType::Int), ColumnType::Str);
        assert_eq!(ColumnType::Str.unify(ColumnType::Float), ColumnType::Str);
    }

    #[test]
    fn schema_inference_skips_nulls() {
        let rows = vec![
            Row::from([
                ("a".to_string(), Value::Int(1)),
                ("b".to_string(), Value::Null),
            ]),
            Row::from([
                ("a".to_string(), Value::Float(1.5)),
                ("b".to_string(), Value::Null),
            ]),
        ];
        let schema = infer_schema(&rows);
        assert_eq!(schema.get("a"), Some(&ColumnType::Float));
        assert_eq!(schema.get("b"), Some(&ColumnType::Str));
    }

    #[test]
    fn canonical_repr_distinguishes_types() {
        assert_ne!(
            Value::Int(1).canonical_repr(),
            Value::Str("1".into()).canonical_repr()
        );
        assert_ne!(Value::Null.canonical_repr(), Value::Str(String::new()).canonical_repr());
    }

    #[test]
    fn value_serializes_as_plain_json() {
        let json = serde_json::to_string(&Value::Int(7)).expect("serialize");
        assert_eq!(json, "7");
        let json = serde_json::to_string(&Value::Null).expect("serialize");
        assert_eq!(json, "null");
        let back: Value = serde_json::from_str("2.5").expect("parse");
        assert_eq!(back, Value::Float(2.5));
    }
}
