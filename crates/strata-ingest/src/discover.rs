//! Run discovery over storage roots.
//!
//! Discovery walks each configured root location through
//! [`StorageBackend::list`], so a local run tree and an object-store
//! bucket behave identically. The run pattern matches first-level
//! directory names under a root; each collection's file pattern then
//! matches run-relative paths within the run's subtree.
//!
//! Failures are per-(run, collection): a collection with zero matches
//! for a run is recorded as a miss without disturbing discovery of
//! other collections or runs.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use strata_config::{CollectionConfig, FilePattern, RunPattern, WorkflowConfig};
use strata_core::{Error, RunId, StorageBackend};

use crate::error::Result;

/// A discovered pipeline run.
#[derive(Debug, Clone)]
pub struct DiscoveredRun {
    /// Stable run identifier derived from the matched directory name.
    pub run_id: RunId,
    /// The root location this run was found under.
    pub location: String,
    /// Backend key prefix of the run's subtree (ends with `/`).
    pub prefix: String,
}

/// A file matched for a (run, collection) pair.
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    /// Full backend key of the file.
    pub path: String,
    /// Path relative to the run's subtree.
    pub rel_path: String,
    /// Captured wildcard values, keyed by wildcard name.
    pub captures: BTreeMap<String, String>,
    /// Linked file paths per linking wildcard, resolved against the
    /// linked collection's captures for the same run.
    pub links: BTreeMap<String, Vec<String>>,
}

/// All files discovered for one run, keyed by collection tag.
#[derive(Debug, Clone)]
pub struct RunDiscovery {
    /// The run itself.
    pub run: DiscoveredRun,
    /// Matched files per collection tag.
    pub files: BTreeMap<String, Vec<DiscoveredFile>>,
}

/// A (run, collection) pair with zero matching files.
#[derive(Debug, Clone)]
pub struct DiscoveryMiss {
    /// The run that lacked files.
    pub run_id: RunId,
    /// The collection whose pattern matched nothing.
    pub collection: String,
    /// The root location of the run.
    pub location: String,
}

/// A linking wildcard value with no counterpart in the linked collection.
#[derive(Debug, Clone)]
pub struct UnresolvedLink {
    /// The run in which resolution failed.
    pub run_id: RunId,
    /// The collection declaring the linking wildcard.
    pub collection: String,
    /// The wildcard name.
    pub wildcard: String,
    /// The captured value that found no counterpart.
    pub value: String,
}

/// The complete discovery result for one workflow.
#[derive(Debug, Clone)]
pub struct WorkflowDiscovery {
    /// The workflow name.
    pub workflow: String,
    /// Discovered runs in run-id order.
    pub runs: Vec<RunDiscovery>,
    /// Per-(run, collection) zero-match reports.
    pub misses: Vec<DiscoveryMiss>,
    /// Linking wildcard values that failed to resolve.
    pub unresolved_links: Vec<UnresolvedLink>,
}

/// Discovers runs and their collection files for configured workflows.
pub struct RunDiscoverer {
    source: Arc<dyn StorageBackend>,
}

impl RunDiscoverer {
    /// Creates a discoverer over the given source backend.
    #[must_use]
    pub fn new(source: Arc<dyn StorageBackend>) -> Self {
        Self { source }
    }

    /// Discovers all runs of a workflow across its root locations.
    ///
    /// # Errors
    ///
    /// Returns an error only for backend failures or patterns that fail
    /// to compile (which validation normally prevents); zero-match
    /// situations are reported in the result, not as errors.
    pub async fn discover(&self, workflow: &WorkflowConfig) -> Result<WorkflowDiscovery> {
        let run_pattern = RunPattern::compile(&workflow.run_pattern)
            .map_err(|e| Error::InvalidInput(e.to_string()))?;

        let mut patterns: Vec<(&CollectionConfig, FilePattern)> = Vec::new();
        for collection in &workflow.collections {
            let pattern = FilePattern::compile(&collection.pattern)
                .map_err(|e| Error::InvalidInput(e.to_string()))?;
            patterns.push((collection, pattern));
        }

        let mut runs: Vec<RunDiscovery> = Vec::new();
        let mut seen_runs: BTreeSet<RunId> = BTreeSet::new();
        let mut misses = Vec::new();

        for location in &workflow.locations {
            let location = location.trim_end_matches('/');
            let listing = self.source.list(&format!("{location}/")).await?;

            // First-level entries under the root are candidate run dirs.
            let mut run_dirs: BTreeMap<String, Vec<String>> = BTreeMap::new();
            for object in listing {
                let Some(rel) = object.path.strip_prefix(&format!("{location}/")) else {
                    continue;
                };
                let Some((first, rest)) = rel.split_once('/') else {
                    // A file directly under the root belongs to no run.
                    continue;
                };
                run_dirs
                    .entry(first.to_string())
                    .or_default()
                    .push(rest.to_string());
            }

            for (dir_name, rel_files) in run_dirs {
                let Some(id) = run_pattern.match_entry(&dir_name) else {
                    continue;
                };
                let run_id = RunId::new(id)?;

                if !seen_runs.insert(run_id.clone()) {
                    tracing::warn!(
                        workflow = workflow.name,
                        run = %run_id,
                        location,
                        "run id already discovered under another location, skipping"
                    );
                    continue;
                }

                let run = DiscoveredRun {
                    run_id: run_id.clone(),
                    location: location.to_string(),
                    prefix: format!("{location}/{dir_name}/"),
                };

                let mut files: BTreeMap<String, Vec<DiscoveredFile>> = BTreeMap::new();
                for (collection, pattern) in &patterns {
                    let mut matched = Vec::new();
                    for rel in &rel_files {
                        if let Some(captures) = pattern.match_path(rel) {
                            matched.push(DiscoveredFile {
                                path: format!("{}{rel}", run.prefix),
                                rel_path: rel.clone(),
                                captures,
                                links: BTreeMap::new(),
                            });
                        }
                    }
                    matched.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));

                    if matched.is_empty() {
                        misses.push(DiscoveryMiss {
                            run_id: run_id.clone(),
                            collection: collection.tag.clone(),
                            location: location.to_string(),
                        });
                    }
                    files.insert(collection.tag.clone(), matched);
                }

                runs.push(RunDiscovery { run, files });
            }
        }

        runs.sort_by(|a, b| a.run.run_id.cmp(&b.run.run_id));

        let unresolved_links = resolve_links(workflow, &mut runs);

        tracing::info!(
            workflow = workflow.name,
            runs = runs.len(),
            misses = misses.len(),
            "discovery complete"
        );

        Ok(WorkflowDiscovery {
            workflow: workflow.name.clone(),
            runs,
            misses,
            unresolved_links,
        })
    }
}

/// Resolves linking wildcards against the linked collection's captures
/// within the same run, producing N-to-1 file associations.
fn resolve_links(workflow: &WorkflowConfig, runs: &mut [RunDiscovery]) -> Vec<UnresolvedLink> {
    let mut unresolved = Vec::new();

    let linking: Vec<(&str, &str, &str)> = workflow
        .collections
        .iter()
        .flat_map(|c| {
            c.wildcards.iter().filter_map(move |w| {
                w.link_to
                    .as_deref()
                    .map(|target| (c.tag.as_str(), w.name.as_str(), target))
            })
        })
        .collect();

    if linking.is_empty() {
        return unresolved;
    }

    for run in runs {
        for (tag, wildcard, target) in &linking {
            // Index the target collection's capture values once per run.
            let mut target_index: BTreeMap<String, Vec<String>> = BTreeMap::new();
            if let Some(target_files) = run.files.get(*target) {
                for file in target_files {
                    if let Some(value) = file.captures.get(*wildcard) {
                        target_index
                            .entry(value.clone())
                            .or_default()
                            .push(file.path.clone());
                    }
                }
            }

            let Some(files) = run.files.get_mut(*tag) else {
                continue;
            };
            for file in files {
                let Some(value) = file.captures.get(*wildcard).cloned() else {
                    continue;
                };
                match target_index.get(&value) {
                    Some(paths) => {
                        file.links.insert((*wildcard).to_string(), paths.clone());
                    }
                    None => unresolved.push(UnresolvedLink {
                        run_id: run.run.run_id.clone(),
                        collection: (*tag).to_string(),
                        wildcard: (*wildcard).to_string(),
                        value,
                    }),
                }
            }
        }
    }

    unresolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use strata_config::StrataConfig;
    use strata_core::storage::MemoryBackend;
    use strata_core::WritePrecondition;

    async fn seed(backend: &MemoryBackend, keys: &[&str]) {
        for key in keys {
            backend
                .put(key, Bytes::from_static(b"x"), WritePrecondition::None)
                .await
                .expect("seed");
        }
    }

    fn workflow(run_pattern: &str, collections: Vec<CollectionConfig>) -> WorkflowConfig {
        WorkflowConfig {
            name: "w".into(),
            engine: "snakemake".into(),
            locations: vec!["data/w".into()],
            run_pattern: run_pattern.into(),
            collections,
        }
    }

    fn table(tag: &str, pattern: &str) -> CollectionConfig {
        serde_json::from_value(serde_json::json!({
            "tag": tag,
            "type": "table",
            "pattern": pattern,
        }))
        .expect("collection")
    }

    #[tokio::test]
    async fn discovers_runs_and_files() {
        let backend = Arc::new(MemoryBackend::new());
        seed(
            &backend,
            &[
                "data/w/run-1/meta.tsv",
                "data/w/run-2/meta.tsv",
                "data/w/run-2/notes.txt",
                "data/w/stray.tsv",
                "data/w/scratch/meta.tsv",
            ],
        )
        .await;

        let workflow = workflow(r"run-(?P<id>\d+)", vec![table("metadata", "*.tsv")]);
        let discoverer = RunDiscoverer::new(backend);
        let discovery = discoverer.discover(&workflow).await.expect("discover");

        assert_eq!(discovery.runs.len(), 2);
        assert_eq!(discovery.runs[0].run.run_id.as_str(), "1");
        assert_eq!(discovery.runs[1].run.run_id.as_str(), "2");
        assert_eq!(discovery.runs[0].files["metadata"].len(), 1);
        assert_eq!(
            discovery.runs[0].files["metadata"][0].path,
            "data/w/run-1/meta.tsv"
        );
        assert!(discovery.misses.is_empty());
    }

    #[tokio::test]
    async fn zero_match_collections_are_reported_not_fatal() {
        let backend = Arc::new(MemoryBackend::new());
        seed(&backend, &["data/w/run-1/meta.tsv"]).await;

        let workflow = workflow(
            r"run-(?P<id>\d+)",
            vec![table("metadata", "*.tsv"), table("counts", "counts/*.tsv")],
        );
        let discoverer = RunDiscoverer::new(backend);
        let discovery = discoverer.discover(&workflow).await.expect("discover");

        assert_eq!(discovery.runs.len(), 1);
        assert_eq!(discovery.misses.len(), 1);
        assert_eq!(discovery.misses[0].collection, "counts");
        // The other collection still matched.
        assert_eq!(discovery.runs[0].files["metadata"].len(), 1);
    }

    #[tokio::test]
    async fn captures_wildcard_values() {
        let backend = Arc::new(MemoryBackend::new());
        seed(
            &backend,
            &["data/w/run-1/counts/s1.tsv", "data/w/run-1/counts/s2.tsv"],
        )
        .await;

        let mut collection = table("counts", "counts/{sample}.tsv");
        collection.wildcards = vec![strata_config::WildcardConfig {
            name: "sample".into(),
            link_to: None,
        }];
        let workflow = workflow(r"run-(?P<id>\d+)", vec![collection]);

        let discovery = RunDiscoverer::new(backend)
            .discover(&workflow)
            .await
            .expect("discover");

        let files = &discovery.runs[0].files["counts"];
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].captures["sample"], "s1");
        assert_eq!(files[1].captures["sample"], "s2");
    }

    #[tokio::test]
    async fn linking_wildcards_associate_files() {
        let backend = Arc::new(MemoryBackend::new());
        seed(
            &backend,
            &[
                "data/w/run-1/tracks/s1/fwd.bam",
                "data/w/run-1/tracks/s1/rev.bam",
                "data/w/run-1/index/s1.bai",
                "data/w/run-1/tracks/s2/fwd.bam",
            ],
        )
        .await;

        let mut tracks = table("tracks", "tracks/{sample}/{part}.bam");
        tracks.wildcards = vec![strata_config::WildcardConfig {
            name: "sample".into(),
            link_to: Some("index".into()),
        }];
        let mut index = table("index", "index/{sample}.bai");
        index.wildcards = vec![strata_config::WildcardConfig {
            name: "sample".into(),
            link_to: None,
        }];

        let workflow = workflow(r"run-(?P<id>\d+)", vec![tracks, index]);
        let discovery = RunDiscoverer::new(backend)
            .discover(&workflow)
            .await
            .expect("discover");

        let tracks = &discovery.runs[0].files["tracks"];
        // Both s1 track files associate with the one s1 index file.
        let s1_tracks: Vec<_> = tracks
            .iter()
            .filter(|f| f.captures["sample"] == "s1")
            .collect();
        assert_eq!(s1_tracks.len(), 2);
        for file in s1_tracks {
            assert_eq!(
                file.links["sample"],
                vec!["data/w/run-1/index/s1.bai".to_string()]
            );
        }

        // s2 has no index file: reported, not fatal.
        assert_eq!(discovery.unresolved_links.len(), 1);
        assert_eq!(discovery.unresolved_links[0].value, "s2");
    }

    #[tokio::test]
    async fn config_example_discovers_cleanly() {
        let backend = Arc::new(MemoryBackend::new());
        seed(
            &backend,
            &[
                "data/amplicon/run-1/meta.tsv",
                "data/amplicon/run-1/counts/s1.tsv",
                "data/amplicon/run-1/jbrowse/config.json",
            ],
        )
        .await;

        let config = StrataConfig::example();
        let discovery = RunDiscoverer::new(backend)
            .discover(&config.workflows[0])
            .await
            .expect("discover");

        assert_eq!(discovery.runs.len(), 1);
        assert!(discovery.misses.is_empty());
    }
}
