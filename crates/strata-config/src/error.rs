//! Configuration errors.

/// Result type alias for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors raised while parsing or validating a configuration document.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The document is not valid JSON or violates the schema.
    #[error("configuration parse error: {source}")]
    Parse {
        /// The underlying deserialization failure.
        #[from]
        source: serde_json::Error,
    },

    /// A run pattern failed to compile.
    #[error("invalid run pattern '{pattern}': {source}")]
    InvalidRunPattern {
        /// The pattern as written.
        pattern: String,
        /// The regex compilation failure.
        source: regex::Error,
    },

    /// A file pattern failed to compile.
    #[error("invalid file pattern '{pattern}': {message}")]
    InvalidFilePattern {
        /// The pattern as written.
        pattern: String,
        /// Description of the failure.
        message: String,
    },

    /// A workflow name or collection tag is not storage-path safe.
    #[error("invalid name in {context}: {source}")]
    InvalidName {
        /// Where the name appears (workflow, collection).
        context: String,
        /// The underlying identifier validation failure.
        source: strata_core::Error,
    },

    /// Two workflows share a name.
    #[error("duplicate workflow '{name}'")]
    DuplicateWorkflow {
        /// The duplicated name.
        name: String,
    },

    /// Two collections in a workflow share a tag, or a declared tag
    /// collides with a derived joined tag.
    #[error("duplicate collection tag '{tag}' in workflow '{workflow}'")]
    DuplicateCollection {
        /// The owning workflow.
        workflow: String,
        /// The duplicated tag.
        tag: String,
    },

    /// A required field is empty or structurally invalid.
    #[error("invalid field in {context}: {message}")]
    InvalidField {
        /// Where the field appears.
        context: String,
        /// Description of the problem.
        message: String,
    },

    /// A wildcard declaration does not line up with the pattern or its
    /// link target.
    #[error("invalid wildcard '{wildcard}' in {context}: {message}")]
    InvalidWildcard {
        /// Where the wildcard is declared.
        context: String,
        /// The wildcard name.
        wildcard: String,
        /// Description of the problem.
        message: String,
    },

    /// A join specification references unknown or unusable targets.
    #[error("invalid join on {context}: {message}")]
    InvalidJoin {
        /// The collection declaring the join.
        context: String,
        /// Description of the problem.
        message: String,
    },
}
