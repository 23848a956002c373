//! Strongly-typed identifiers for strata entities.
//!
//! Identifiers come in two flavors:
//!
//! - **Declared names** (`WorkflowName`, `CollectionTag`): taken from
//!   configuration, validated to be storage-path safe at construction.
//! - **Derived identifiers** (`RunId`): computed from matched filesystem
//!   paths during discovery. A run's identity must be stable across
//!   passes, so it derives only from the path, never from a generator.
//! - **Generated identifiers** (`PassId`): ULIDs, lexicographically
//!   sortable by creation time, unique without coordination.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

use crate::error::{Error, Result};

/// Validates a declared name: non-empty, ASCII alphanumeric plus `-`, `_`, `.`.
///
/// Names appear in storage paths, so path separators and control
/// characters are rejected outright.
fn validate_name(value: &str, what: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::InvalidId {
            message: format!("{what} must not be empty"),
        });
    }
    if value.len() > 128 {
        return Err(Error::InvalidId {
            message: format!("{what} '{value}' exceeds 128 characters"),
        });
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(Error::InvalidId {
            message: format!(
                "{what} '{value}' contains characters outside [A-Za-z0-9._-]"
            ),
        });
    }
    if value == "." || value == ".." {
        return Err(Error::InvalidId {
            message: format!("{what} must not be a relative path component"),
        });
    }
    Ok(())
}

/// The declared name of a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowName(String);

impl WorkflowName {
    /// Creates a workflow name, validating it is storage-path safe.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidId`] if the name is empty or contains
    /// characters outside `[A-Za-z0-9._-]`.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_name(&name, "workflow name")?;
        Ok(Self(name))
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkflowName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for WorkflowName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// The declared tag of a data collection within a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionTag(String);

impl CollectionTag {
    /// Creates a collection tag, validating it is storage-path safe.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidId`] if the tag is empty or contains
    /// characters outside `[A-Za-z0-9._-]`.
    pub fn new(tag: impl Into<String>) -> Result<Self> {
        let tag = tag.into();
        validate_name(&tag, "collection tag")?;
        Ok(Self(tag))
    }

    /// Returns the tag as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the tag of the derived joined table for this collection.
    ///
    /// Collections declaring a join produce a separately versioned table
    /// registered under this tag.
    #[must_use]
    pub fn joined(&self) -> Self {
        Self(format!("{}_joined", self.0))
    }
}

impl fmt::Display for CollectionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for CollectionTag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// The full identity of a data collection: workflow plus tag.
///
/// This is the key under which tables are stored and catalog entries
/// are registered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CollectionId {
    /// The owning workflow.
    pub workflow: WorkflowName,
    /// The collection tag within the workflow.
    pub tag: CollectionTag,
}

impl CollectionId {
    /// Creates a collection identity from already-validated parts.
    #[must_use]
    pub const fn new(workflow: WorkflowName, tag: CollectionTag) -> Self {
        Self { workflow, tag }
    }

    /// Returns the identity of the derived joined table for this collection.
    #[must_use]
    pub fn joined(&self) -> Self {
        Self {
            workflow: self.workflow.clone(),
            tag: self.tag.joined(),
        }
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.workflow, self.tag)
    }
}

/// A stable identifier for a discovered pipeline run.
///
/// Derived from the matched run directory during discovery: the named
/// capture `id` of the run pattern if present, otherwise the full
/// matched directory name. Never generated, so re-discovery of the same
/// tree always yields the same identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Creates a run identifier from a matched path component.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidId`] if the value is empty, longer than
    /// 256 characters, or contains `/` or control characters.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::InvalidId {
                message: "run id must not be empty".into(),
            });
        }
        if id.len() > 256 {
            return Err(Error::InvalidId {
                message: format!("run id '{id}' exceeds 256 characters"),
            });
        }
        if id.chars().any(|c| c == '/' || c.is_control()) {
            return Err(Error::InvalidId {
                message: format!("run id '{id}' contains path separators or control characters"),
            });
        }
        Ok(Self(id))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RunId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// A unique identifier for a single discovery/ingestion pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PassId(Ulid);

impl PassId {
    /// Generates a new unique pass ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    /// Returns the underlying ULID.
    #[must_use]
    pub const fn as_ulid(&self) -> Ulid {
        self.0
    }

    /// Returns the creation timestamp encoded in the ID.
    #[must_use]
    pub fn created_at(&self) -> chrono::DateTime<chrono::Utc> {
        let ms = self.0.timestamp_ms();
        i64::try_from(ms)
            .ok()
            .and_then(chrono::DateTime::from_timestamp_millis)
            .unwrap_or_else(chrono::Utc::now)
    }
}

impl fmt::Display for PassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PassId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ulid::from_string(s).map(Self).map_err(|e| Error::InvalidId {
            message: format!("invalid pass ID '{s}': {e}"),
        })
    }
}
