//! # strata-config
//!
//! The declarative configuration model for strata: workflows, data
//! collections, discovery patterns, and joins.
//!
//! Configuration is dynamic at rest (a JSON document) but strongly
//! typed the moment it enters the process: [`StrataConfig::parse`]
//! deserializes with `deny_unknown_fields` everywhere and then runs
//! full shape validation, so invalid configurations are rejected before
//! any I/O begins.
//!
//! ```rust
//! use strata_config::StrataConfig;
//!
//! let config = StrataConfig::example();
//! let json = serde_json::to_string(&config).unwrap();
//! let parsed = StrataConfig::parse(&json).unwrap();
//! assert_eq!(parsed.workflows.len(), config.workflows.len());
//! ```

pub mod error;
pub mod model;
pub mod pattern;
pub mod validate;

pub use error::{ConfigError, Result};
pub use model::{
    CollectionConfig, CollectionKind, JoinConfig, JoinHow, ParseOptions, StrataConfig,
    WildcardConfig, WorkflowConfig,
};
pub use pattern::{FilePattern, RunPattern};

impl StrataConfig {
    /// Parses and validates a configuration document from JSON.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the document is malformed, declares
    /// unknown keys, or fails shape validation.
    pub fn parse(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        validate::validate(&config)?;
        Ok(config)
    }
}
