//! JBrowse2 configuration bundle reader.
//!
//! A JBrowse2 collection matches the bundle's `config.json`. Rather
//! than row data, the reader validates the bundle structure and
//! extracts a manifest: one row per declared track, carrying the track
//! identity, type, assembly, and data URI.

use async_trait::async_trait;
use serde_json::Value as Json;

use strata_core::StorageBackend;
use strata_store::{Row, Value};

use crate::error::ReadError;

use super::FormatReader;

/// Reader for JBrowse2 `config.json` bundles.
#[derive(Debug, Clone, Default)]
pub struct JBrowseReader;

impl JBrowseReader {
    /// Creates a new bundle reader.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FormatReader for JBrowseReader {
    async fn read(&self, source: &dyn StorageBackend, path: &str) -> Result<Vec<Row>, ReadError> {
        let data = source
            .get(path)
            .await
            .map_err(|source| ReadError::UnreadableFile {
                path: path.to_string(),
                source,
            })?;

        let config: Json =
            serde_json::from_slice(&data).map_err(|e| ReadError::UnreadableFile {
                path: path.to_string(),
                source: strata_core::Error::serialization(format!("invalid bundle JSON: {e}")),
            })?;

        let Some(root) = config.as_object() else {
            return Err(ReadError::SchemaMismatch {
                path: path.to_string(),
                missing: vec!["assemblies".into()],
            });
        };

        // A structurally valid bundle declares its assemblies.
        let Some(assemblies) = root.get("assemblies").and_then(Json::as_array) else {
            return Err(ReadError::SchemaMismatch {
                path: path.to_string(),
                missing: vec!["assemblies".into()],
            });
        };

        let default_assembly = assemblies
            .first()
            .and_then(|a| a.get("name"))
            .and_then(Json::as_str)
            .unwrap_or_default()
            .to_string();

        let tracks = root
            .get("tracks")
            .and_then(Json::as_array)
            .cloned()
            .unwrap_or_default();

        let mut rows = Vec::with_capacity(tracks.len());
        for track in &tracks {
            let track_id = track
                .get("trackId")
                .and_then(Json::as_str)
                .unwrap_or_default();
            if track_id.is_empty() {
                continue;
            }

            let mut row = Row::new();
            row.insert("track_id".into(), Value::Str(track_id.to_string()));
            row.insert(
                "track_type".into(),
                string_or_null(track.get("type").and_then(Json::as_str)),
            );
            row.insert(
                "track_name".into(),
                string_or_null(track.get("name").and_then(Json::as_str)),
            );

            let assembly = track
                .get("assemblyNames")
                .and_then(Json::as_array)
                .and_then(|names| names.first())
                .and_then(Json::as_str)
                .unwrap_or(&default_assembly);
            row.insert("assembly".into(), string_or_null(Some(assembly)));

            let uri = track
                .get("adapter")
                .and_then(|a| find_uri(a))
                .unwrap_or_default();
            row.insert("uri".into(), string_or_null(Some(&uri)));

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

fn string_or_null(value: Option<&str>) -> Value {
    match value {
        Some(s) if !s.is_empty() => Value::Str(s.to_string()),
        _ => Value::Null,
    }
}

/// Finds the first `uri` field anywhere inside an adapter block.
///
/// Adapter shapes vary per track type (`bamLocation`, `fastaLocation`,
/// nested index locations); the first URI encountered depth-first is
/// the primary data file by convention.
fn find_uri(value: &Json) -> Option<String> {
    match value {
        Json::Object(map) => {
            if let Some(uri) = map.get("uri").and_then(Json::as_str) {
                return Some(uri.to_string());
            }
            map.values().find_map(find_uri)
        }
        Json::Array(items) => items.iter().find_map(find_uri),
        _ => None,
    }
}
