//! The declarative configuration model.
//!
//! A configuration document declares workflows, their data collections,
//! discovery patterns, and optional joins. Deserialization is strict:
//! unknown keys are rejected everywhere, and required fields are
//! enforced per section. Shape validation beyond what serde can express
//! lives in [`crate::validate`].

use serde::{Deserialize, Serialize};

/// Root configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StrataConfig {
    /// Declared workflows.
    pub workflows: Vec<WorkflowConfig>,
}

/// A logical pipeline definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WorkflowConfig {
    /// Workflow name; becomes part of every storage path.
    pub name: String,

    /// Engine identifier (e.g. `snakemake`, `nextflow`).
    pub engine: String,

    /// Root locations to scan for runs, relative to the source backend.
    pub locations: Vec<String>,

    /// Run-discovery pattern: an anchored regex matched against
    /// first-level directory names under each location. A named capture
    /// `id` becomes the run identifier; otherwise the full match does.
    pub run_pattern: String,

    /// Data collections owned by this workflow.
    #[serde(default)]
    pub collections: Vec<CollectionConfig>,
}

/// Declared type of a data collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionKind {
    /// Delimited tabular files aggregated row-wise.
    Table,
    /// JBrowse2 genome-browser configuration bundles.
    JBrowse2,
}

/// A named, typed unit of data within a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CollectionConfig {
    /// Collection tag, unique within the workflow.
    pub tag: String,

    /// Collection type.
    #[serde(rename = "type")]
    pub kind: CollectionKind,

    /// File-discovery pattern applied to each run's subtree. Supports
    /// glob syntax (`*`, `**`, `?`) plus `{name}` named wildcards.
    pub pattern: String,

    /// Named wildcards appearing in `pattern`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub wildcards: Vec<WildcardConfig>,

    /// Columns to keep after reading (projection allow-list).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_columns: Option<Vec<String>>,

    /// Tabular parse options; only meaningful for `table` collections.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse: Option<ParseOptions>,

    /// Optional join producing a derived table from this collection and
    /// the targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join: Option<JoinConfig>,
}

impl CollectionConfig {
    /// Returns the effective tabular parse options.
    #[must_use]
    pub fn parse_options(&self) -> ParseOptions {
        self.parse.clone().unwrap_or_default()
    }
}

/// A named wildcard in a collection's file pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WildcardConfig {
    /// Wildcard name; must appear as `{name}` in the pattern.
    pub name: String,

    /// Tag of another collection whose captures of the same wildcard
    /// resolve this one, associating N files here with one file there.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_to: Option<String>,
}

/// Tabular parse options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ParseOptions {
    /// Field separator; must be a single ASCII character.
    #[serde(default = "default_separator")]
    pub separator: char,

    /// Number of leading records to skip before the header row.
    #[serde(default)]
    pub skip_rows: usize,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            separator: default_separator(),
            skip_rows: 0,
        }
    }
}

fn default_separator() -> char {
    '\t'
}

/// Join semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinHow {
    /// Keep only rows with matches in every source.
    #[default]
    Inner,
    /// Keep all left rows; unmatched right columns are null-filled.
    Left,
}

/// Declarative join specification on a collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct JoinConfig {
    /// Join key columns; must exist in every participating collection's
    /// post-ingestion schema.
    pub on_columns: Vec<String>,

    /// Join semantics. Defaults to inner.
    #[serde(default)]
    pub how: JoinHow,

    /// Tags of the target collections joined against this one.
    pub with: Vec<String>,
}

impl StrataConfig {
    /// Returns a small example configuration used by docs and tests.
    #[must_use]
    pub fn example() -> Self {
        Self {
            workflows: vec![WorkflowConfig {
                name: "amplicon".into(),
                engine: "snakemake".into(),
                locations: vec!["data/amplicon".into()],
                run_pattern: r"run-(?P<id>\d+)".into(),
                collections: vec![
                    CollectionConfig {
                        tag: "metadata".into(),
                        kind: CollectionKind::Table,
                        pattern: "*.tsv".into(),
                        wildcards: Vec::new(),
                        keep_columns: Some(vec!["sample".into(), "habitat".into()]),
                        parse: None,
                        join: None,
                    },
                    CollectionConfig {
                        tag: "counts".into(),
                        kind: CollectionKind::Table,
                        pattern: "counts/{sample}.tsv".into(),
                        wildcards: vec![WildcardConfig {
                            name: "sample".into(),
                            link_to: None,
                        }],
                        keep_columns: None,
                        parse: Some(ParseOptions {
                            separator: '\t',
                            skip_rows: 0,
                        }),
                        join: Some(JoinConfig {
                            on_columns: vec!["sample".into()],
                            how: JoinHow::Inner,
                            with: vec!["metadata".into()],
                        }),
                    },
                    CollectionConfig {
                        tag: "browser".into(),
                        kind: CollectionKind::JBrowse2,
                        pattern: "jbrowse/**/config.json".into(),
                        wildcards: Vec::new(),
                        keep_columns: None,
                        parse: None,
                        join: None,
                    },
                ],
            }],
        }
    }
}
