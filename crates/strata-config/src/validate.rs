//! Load-time configuration validation.
//!
//! All shape checking happens here, once, before any I/O: patterns must
//! compile, names must be storage-path safe, wildcard links and join
//! targets must resolve, and derived joined tags must not collide with
//! declared ones. A configuration that passes validation cannot fail
//! structurally later in the pipeline.

use std::collections::HashSet;

use strata_core::{CollectionTag, WorkflowName};

use crate::error::{ConfigError, Result};
use crate::model::{CollectionConfig, CollectionKind, StrataConfig, WorkflowConfig};
use crate::pattern::{FilePattern, RunPattern};

/// Validates a full configuration document.
///
/// # Errors
///
/// Returns the first violation found; validation is fail-fast because a
/// broken configuration should be fixed before a pass ever starts.
pub fn validate(config: &StrataConfig) -> Result<()> {
    let mut workflow_names = HashSet::new();

    for workflow in &config.workflows {
        let context = format!("workflow '{}'", workflow.name);

        WorkflowName::new(&workflow.name).map_err(|source| ConfigError::InvalidName {
            context: context.clone(),
            source,
        })?;

        if !workflow_names.insert(workflow.name.clone()) {
            return Err(ConfigError::DuplicateWorkflow {
                name: workflow.name.clone(),
            });
        }

        validate_workflow(workflow, &context)?;
    }

    Ok(())
}

fn validate_workflow(workflow: &WorkflowConfig, context: &str) -> Result<()> {
    if workflow.engine.trim().is_empty() {
        return Err(ConfigError::InvalidField {
            context: context.to_string(),
            message: "engine must not be empty".into(),
        });
    }

    if workflow.locations.is_empty() {
        return Err(ConfigError::InvalidField {
            context: context.to_string(),
            message: "at least one root location is required".into(),
        });
    }
    for location in &workflow.locations {
        if location.trim().is_empty() || location.split('/').any(|seg| seg == "..") {
            return Err(ConfigError::InvalidField {
                context: context.to_string(),
                message: format!("invalid root location '{location}'"),
            });
        }
    }

    RunPattern::compile(&workflow.run_pattern)?;

    // Declared tags plus the joined tags they will derive: both live in
    // the same storage namespace and must not collide.
    let mut tags = HashSet::new();
    for collection in &workflow.collections {
        if !tags.insert(collection.tag.clone()) {
            return Err(ConfigError::DuplicateCollection {
                workflow: workflow.name.clone(),
                tag: collection.tag.clone(),
            });
        }
    }
    for collection in &workflow.collections {
        if collection.join.is_some() {
            let joined = format!("{}_joined", collection.tag);
            if tags.contains(&joined) {
                return Err(ConfigError::DuplicateCollection {
                    workflow: workflow.name.clone(),
                    tag: joined,
                });
            }
        }
    }

    for collection in &workflow.collections {
        validate_collection(workflow, collection)?;
    }

    Ok(())
}

fn validate_collection(workflow: &WorkflowConfig, collection: &CollectionConfig) -> Result<()> {
    let context = format!(
        "collection '{}' in workflow '{}'",
        collection.tag, workflow.name
    );

    CollectionTag::new(&collection.tag).map_err(|source| ConfigError::InvalidName {
        context: context.clone(),
        source,
    })?;

    let pattern = FilePattern::compile(&collection.pattern)?;

    // Bundle collections carry no tabular options.
    if collection.kind == CollectionKind::JBrowse2 {
        if collection.keep_columns.is_some() {
            return Err(ConfigError::InvalidField {
                context: context.clone(),
                message: "keepColumns is not applicable to jbrowse2 collections".into(),
            });
        }
        if collection.parse.is_some() {
            return Err(ConfigError::InvalidField {
                context: context.clone(),
                message: "parse options are not applicable to jbrowse2 collections".into(),
            });
        }
    }

    if let Some(parse) = &collection.parse {
        if !parse.separator.is_ascii() {
            return Err(ConfigError::InvalidField {
                context: context.clone(),
                message: format!("separator '{}' must be a single ASCII character", parse.separator),
            });
        }
    }

    if let Some(keep) = &collection.keep_columns {
        if keep.is_empty() {
            return Err(ConfigError::InvalidField {
                context: context.clone(),
                message: "keepColumns must not be empty when present".into(),
            });
        }
        let mut seen = HashSet::new();
        for column in keep {
            if column.trim().is_empty() {
                return Err(ConfigError::InvalidField {
                    context: context.clone(),
                    message: "keepColumns entries must not be empty".into(),
                });
            }
            if !seen.insert(column) {
                return Err(ConfigError::InvalidField {
                    context: context.clone(),
                    message: format!("duplicate keepColumns entry '{column}'"),
                });
            }
        }
    }

    validate_wildcards(workflow, collection, &pattern, &context)?;
    validate_join(workflow, collection, &context)?;

    Ok(())
}

fn validate_wildcards(
    workflow: &WorkflowConfig,
    collection: &CollectionConfig,
    pattern: &FilePattern,
    context: &str,
) -> Result<()> {
    let pattern_names: HashSet<&String> = pattern.wildcard_names().iter().collect();
    let mut declared = HashSet::new();

    for wildcard in &collection.wildcards {
        if !declared.insert(wildcard.name.clone()) {
            return Err(ConfigError::InvalidWildcard {
                context: context.to_string(),
                wildcard: wildcard.name.clone(),
                message: "declared more than once".into(),
            });
        }

        if !pattern_names.contains(&wildcard.name) {
            return Err(ConfigError::InvalidWildcard {
                context: context.to_string(),
                wildcard: wildcard.name.clone(),
                message: format!(
                    "does not appear in pattern '{}'",
                    collection.pattern
                ),
            });
        }

        if let Some(target) = &wildcard.link_to {
            if target == &collection.tag {
                return Err(ConfigError::InvalidWildcard {
                    context: context.to_string(),
                    wildcard: wildcard.name.clone(),
                    message: "cannot link to the declaring collection".into(),
                });
            }

            let Some(linked) = workflow.collections.iter().find(|c| &c.tag == target) else {
                return Err(ConfigError::InvalidWildcard {
                    context: context.to_string(),
                    wildcard: wildcard.name.clone(),
                    message: format!("links to unknown collection '{target}'"),
                });
            };

            // The linked collection must capture the same wildcard for
            // run-level lookup to have anything to resolve against.
            let linked_pattern = FilePattern::compile(&linked.pattern)?;
            if !linked_pattern
                .wildcard_names()
                .iter()
                .any(|n| n == &wildcard.name)
            {
                return Err(ConfigError::InvalidWildcard {
                    context: context.to_string(),
                    wildcard: wildcard.name.clone(),
                    message: format!(
                        "linked collection '{target}' does not capture '{{{}}}'",
                        wildcard.name
                    ),
                });
            }
        }
    }

    Ok(())
}

fn validate_join(
    workflow: &WorkflowConfig,
    collection: &CollectionConfig,
    context: &str,
) -> Result<()> {
    let Some(join) = &collection.join else {
        return Ok(());
    };

    if join.on_columns.is_empty() {
        return Err(ConfigError::InvalidJoin {
            context: context.to_string(),
            message: "onColumns must not be empty".into(),
        });
    }
    let mut seen = HashSet::new();
    for column in &join.on_columns {
        if column.trim().is_empty() {
            return Err(ConfigError::InvalidJoin {
                context: context.to_string(),
                message: "onColumns entries must not be empty".into(),
            });
        }
        if !seen.insert(column) {
            return Err(ConfigError::InvalidJoin {
                context: context.to_string(),
                message: format!("duplicate join column '{column}'"),
            });
        }
    }

    if join.with.is_empty() {
        return Err(ConfigError::InvalidJoin {
            context: context.to_string(),
            message: "'with' must name at least one target collection".into(),
        });
    }
    let mut targets = HashSet::new();
    for target in &join.with {
        if target == &collection.tag {
            return Err(ConfigError::InvalidJoin {
                context: context.to_string(),
                message: "a collection cannot join against itself".into(),
            });
        }
        if !targets.insert(target) {
            return Err(ConfigError::InvalidJoin {
                context: context.to_string(),
                message: format!("duplicate join target '{target}'"),
            });
        }
        if !workflow.collections.iter().any(|c| &c.tag == target) {
            return Err(ConfigError::InvalidJoin {
                context: context.to_string(),
                message: format!("unknown join target '{target}'"),
            });
        }
    }

    Ok(())
}
