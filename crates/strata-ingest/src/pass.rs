//! The pass runner: one full discovery/ingestion/join/registration
//! cycle over a configuration.
//!
//! A pass is an explicit task with injected storage handles and a
//! cancellation token — no module-level state. Work fans out over a
//! bounded pool of (run, collection) units; every storage call carries
//! a deadline via the timeout backend. Cancellation is honored at unit
//! boundaries: in-flight runs finish (they are atomic anyway), nothing
//! new starts, and the pass reports itself cancelled instead of
//! failing.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use strata_catalog::Registrar;
use strata_config::{StrataConfig, WorkflowConfig};
use strata_core::{
    CollectionId, CollectionTag, PassId, RunId, ScopedStorage, StorageBackend, TimeoutBackend,
    WorkflowName,
};
use strata_store::TableStore;

use crate::aggregate::{Aggregator, ParsedRun};
use crate::discover::{DiscoveredFile, RunDiscoverer, WorkflowDiscovery};
use crate::error::Result;
use crate::join::JoinExecutor;
use crate::metrics;
use crate::readers::{reader_for, FormatReader};
use crate::report::{
    CollectionReport, JoinOutcomeReport, JoinReport, PassReport, RunFailure, WorkflowReport,
};

/// Tuning knobs for a pass.
#[derive(Debug, Clone)]
pub struct PassOptions {
    /// Maximum concurrent (run, collection) units.
    pub concurrency: usize,
    /// Deadline applied to every storage call.
    pub storage_timeout: Duration,
}

impl Default for PassOptions {
    fn default() -> Self {
        Self {
            concurrency: 8,
            storage_timeout: Duration::from_secs(30),
        }
    }
}

/// Outcome of one (run, collection) unit.
enum UnitOutcome {
    Ingested,
    AlreadyPresent,
    Failed(String),
    Cancelled,
}

struct UnitResult {
    tag: String,
    run_id: RunId,
    outcome: UnitOutcome,
}

/// Runs discovery, ingestion, joins, and catalog registration for a
/// validated configuration.
pub struct PassRunner {
    source: Arc<dyn StorageBackend>,
    storage: ScopedStorage,
    config: StrataConfig,
    options: PassOptions,
    cancel: CancellationToken,
}

impl PassRunner {
    /// Creates a runner over a source backend (workflow trees) and the
    /// catalog storage scope.
    #[must_use]
    pub fn new(
        source: Arc<dyn StorageBackend>,
        storage: ScopedStorage,
        config: StrataConfig,
    ) -> Self {
        Self {
            source,
            storage,
            config,
            options: PassOptions::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Sets the pass options.
    #[must_use]
    pub fn with_options(mut self, options: PassOptions) -> Self {
        self.options = options;
        self
    }

    /// Uses an externally owned cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Returns the pass's cancellation token.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Executes one full pass.
    ///
    /// Per-file and per-run failures land in the report; only storage
    /// outages and catalog registration failures abort the pass.
    ///
    /// # Errors
    ///
    /// Returns an error if discovery storage fails outright, a table
    /// cannot be created, or a catalog entry cannot be registered.
    pub async fn run(&self) -> Result<PassReport> {
        let pass_id = PassId::generate();
        let started_at = Utc::now();
        let clock = std::time::Instant::now();

        let source: Arc<dyn StorageBackend> = Arc::new(TimeoutBackend::new(
            self.source.clone(),
            self.options.storage_timeout,
        ));
        let storage = ScopedStorage::new(
            Arc::new(TimeoutBackend::new(
                self.storage.backend().clone(),
                self.options.storage_timeout,
            )),
            self.storage.store_id(),
        )?;

        tracing::info!(pass = %pass_id, workflows = self.config.workflows.len(), "pass started");

        let discoverer = RunDiscoverer::new(source.clone());
        let mut workflows = Vec::new();
        let mut cancelled = false;

        for workflow in &self.config.workflows {
            let discovery = discoverer.discover(workflow).await?;
            let report = self
                .run_workflow(workflow, &discovery, &source, &storage, &mut cancelled)
                .await?;
            workflows.push(report);

            if cancelled {
                break;
            }
        }

        metrics::record_pass_duration(clock.elapsed().as_secs_f64());

        let report = PassReport {
            pass_id,
            started_at,
            finished_at: Utc::now(),
            cancelled,
            workflows,
        };
        tracing::info!(
            pass = %pass_id,
            ingested = report.total_ingested(),
            already_present = report.total_already_present(),
            failed = report.total_failed(),
            cancelled,
            "pass finished"
        );
        Ok(report)
    }

    async fn run_workflow(
        &self,
        workflow: &WorkflowConfig,
        discovery: &WorkflowDiscovery,
        source: &Arc<dyn StorageBackend>,
        storage: &ScopedStorage,
        cancelled: &mut bool,
    ) -> Result<WorkflowReport> {
        let workflow_name = WorkflowName::new(&workflow.name)?;

        // Per-collection context: reader + table, created up front so
        // every table exists before any unit commits.
        let mut contexts: BTreeMap<String, (Arc<dyn FormatReader>, TableStore)> = BTreeMap::new();
        for collection in &workflow.collections {
            let id = CollectionId::new(workflow_name.clone(), CollectionTag::new(&collection.tag)?);
            let table = TableStore::new(storage.clone(), id);
            table.ensure_exists().await?;
            contexts.insert(
                collection.tag.clone(),
                (Arc::from(reader_for(collection)), table),
            );
        }

        let results = self
            .fan_out_units(workflow, discovery, source, &contexts, cancelled)
            .await;

        // Fold unit results into per-collection reports.
        let mut miss_counts: BTreeMap<&str, u64> = BTreeMap::new();
        for miss in &discovery.misses {
            *miss_counts.entry(miss.collection.as_str()).or_default() += 1;
        }

        let mut collections = Vec::new();
        for collection in &workflow.collections {
            let mut report = CollectionReport {
                tag: collection.tag.clone(),
                runs_ingested: 0,
                runs_already_present: 0,
                failures: Vec::new(),
                discovery_misses: miss_counts
                    .get(collection.tag.as_str())
                    .copied()
                    .unwrap_or(0),
                table_version: None,
            };

            for result in results.iter().filter(|r| r.tag == collection.tag) {
                match &result.outcome {
                    UnitOutcome::Ingested => report.runs_ingested += 1,
                    UnitOutcome::AlreadyPresent => report.runs_already_present += 1,
                    UnitOutcome::Failed(reason) => report.failures.push(RunFailure {
                        run_id: result.run_id.clone(),
                        reason: reason.clone(),
                    }),
                    UnitOutcome::Cancelled => {}
                }
            }

            let (_, table) = &contexts[&collection.tag];
            report.table_version = Some(table.manifest().await?.version);
            collections.push(report);
        }

        // Joins and registration are skipped on cancellation; the next
        // pass picks them up via the same staleness checks.
        let joins = if *cancelled {
            Vec::new()
        } else {
            self.execute_joins(workflow, &workflow_name, storage).await
        };

        if !*cancelled {
            self.register_entries(workflow, &workflow_name, storage, &contexts)
                .await?;
        }

        Ok(WorkflowReport {
            workflow: workflow.name.clone(),
            runs_discovered: discovery.runs.len() as u64,
            collections,
            joins,
            unresolved_links: discovery.unresolved_links.len() as u64,
        })
    }

    /// Schedules all (run, collection) units over the bounded pool.
    async fn fan_out_units(
        &self,
        workflow: &WorkflowConfig,
        discovery: &WorkflowDiscovery,
        source: &Arc<dyn StorageBackend>,
        contexts: &BTreeMap<String, (Arc<dyn FormatReader>, TableStore)>,
        cancelled: &mut bool,
    ) -> Vec<UnitResult> {
        let semaphore = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
        let mut handles = Vec::new();

        'scheduling: for run_discovery in &discovery.runs {
            for collection in &workflow.collections {
                if self.cancel.is_cancelled() {
                    *cancelled = true;
                    break 'scheduling;
                }

                let files = run_discovery
                    .files
                    .get(&collection.tag)
                    .cloned()
                    .unwrap_or_default();
                if files.is_empty() {
                    // Recorded as a discovery miss already.
                    continue;
                }

                let (reader, table) = &contexts[&collection.tag];
                let unit = Unit {
                    tag: collection.tag.clone(),
                    run_id: run_discovery.run.run_id.clone(),
                    files,
                    reader: reader.clone(),
                    table: table.clone(),
                    source: source.clone(),
                    cancel: self.cancel.clone(),
                };

                let semaphore = semaphore.clone();
                handles.push(tokio::spawn(async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return unit.cancelled();
                    };
                    unit.execute().await
                }));
            }
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(result) => {
                    if matches!(result.outcome, UnitOutcome::Cancelled) {
                        *cancelled = true;
                    }
                    results.push(result);
                }
                Err(e) => tracing::error!(error = %e, "ingestion unit panicked"),
            }
        }
        results
    }

    async fn execute_joins(
        &self,
        workflow: &WorkflowConfig,
        workflow_name: &WorkflowName,
        storage: &ScopedStorage,
    ) -> Vec<JoinReport> {
        let executor = JoinExecutor::new(storage.clone());
        let mut reports = Vec::new();

        for collection in &workflow.collections {
            let Some(join) = &collection.join else {
                continue;
            };
            let Ok(tag) = CollectionTag::new(&collection.tag) else {
                continue;
            };
            let base = CollectionId::new(workflow_name.clone(), tag);
            let output = base.joined();
            let sources = JoinExecutor::source_ids(&base, join);

            let outcome = match executor.is_stale(&output, &sources).await {
                Ok(false) => JoinOutcomeReport::UpToDate,
                Ok(true) => match executor.execute(&base, join, &output).await {
                    Ok(result) => JoinOutcomeReport::Recomputed {
                        version: result.version,
                        rows: result.row_count,
                    },
                    Err(e) => {
                        tracing::warn!(output = %output, error = %e, "join failed");
                        JoinOutcomeReport::Failed {
                            reason: e.to_string(),
                        }
                    }
                },
                Err(e) => {
                    tracing::warn!(output = %output, error = %e, "join staleness check failed");
                    JoinOutcomeReport::Failed {
                        reason: e.to_string(),
                    }
                }
            };

            reports.push(JoinReport {
                output_tag: output.tag.to_string(),
                outcome,
            });
        }

        reports
    }

    /// Registers catalog entries for every collection (and join output)
    /// whose table has advanced past the registered entry.
    async fn register_entries(
        &self,
        workflow: &WorkflowConfig,
        workflow_name: &WorkflowName,
        storage: &ScopedStorage,
        contexts: &BTreeMap<String, (Arc<dyn FormatReader>, TableStore)>,
    ) -> Result<()> {
        let registrar = Registrar::new(storage.clone());

        let mut targets: Vec<CollectionId> = Vec::new();
        for collection in &workflow.collections {
            let (_, table) = &contexts[&collection.tag];
            targets.push(table.id().clone());
            if collection.join.is_some() {
                targets.push(table.id().joined());
            }
        }

        for id in targets {
            let table = TableStore::new(storage.clone(), id.clone());
            let manifest = match table.manifest().await {
                Ok(manifest) => manifest,
                Err(strata_store::StoreError::Core(e)) if e.is_not_found() => continue,
                Err(e) => return Err(e.into()),
            };
            if manifest.version == 0 {
                // Nothing ingested yet; publishing an empty schema
                // would only mislead consumers.
                continue;
            }

            let unchanged = registrar
                .get(&id)
                .await?
                .is_some_and(|entry| entry.table_version == manifest.version);
            if unchanged {
                continue;
            }

            registrar
                .register(
                    &id,
                    manifest.schema.clone(),
                    table.manifest_key(),
                    manifest.version,
                    manifest.lineage.clone(),
                )
                .await?;
        }

        Ok(())
    }
}

/// One (run, collection) unit of work.
struct Unit {
    tag: String,
    run_id: RunId,
    files: Vec<DiscoveredFile>,
    reader: Arc<dyn FormatReader>,
    table: TableStore,
    source: Arc<dyn StorageBackend>,
    cancel: CancellationToken,
}

impl Unit {
    fn cancelled(&self) -> UnitResult {
        UnitResult {
            tag: self.tag.clone(),
            run_id: self.run_id.clone(),
            outcome: UnitOutcome::Cancelled,
        }
    }

    fn result(&self, outcome: UnitOutcome) -> UnitResult {
        UnitResult {
            tag: self.tag.clone(),
            run_id: self.run_id.clone(),
            outcome,
        }
    }

    async fn execute(self) -> UnitResult {
        if self.cancel.is_cancelled() {
            return self.cancelled();
        }

        // Skip the read entirely when the run is already present; this
        // is what keeps steady-state passes cheap.
        match self.table.contains_run(&self.run_id).await {
            Ok(true) => return self.result(UnitOutcome::AlreadyPresent),
            Ok(false) => {}
            Err(e) => return self.result(UnitOutcome::Failed(e.to_string())),
        }

        // A run is read whole: any file failure excludes the run from
        // this pass (it retries next pass), never a partial commit.
        let mut rows = Vec::new();
        for file in &self.files {
            match self.reader.read(self.source.as_ref(), &file.path).await {
                Ok(mut file_rows) => {
                    for row in &mut file_rows {
                        for (wildcard, value) in &file.captures {
                            row.entry(wildcard.clone())
                                .or_insert_with(|| strata_store::Value::Str(value.clone()));
                        }
                    }
                    rows.extend(file_rows);
                }
                Err(e) => return self.result(UnitOutcome::Failed(e.to_string())),
            }
        }

        let aggregator = Aggregator::new(self.table.clone());
        let result = aggregator
            .aggregate(
                vec![ParsedRun {
                    run_id: self.run_id.clone(),
                    rows,
                }],
                Utc::now(),
            )
            .await;

        if result.ingested == 1 {
            self.result(UnitOutcome::Ingested)
        } else if result.already_present == 1 {
            self.result(UnitOutcome::AlreadyPresent)
        } else if let Some((_, reason)) = result.failed.into_iter().next() {
            self.result(UnitOutcome::Failed(reason))
        } else {
            self.result(UnitOutcome::Failed("run produced no outcome".into()))
        }
    }
}

impl std::fmt::Debug for PassRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassRunner")
            .field("store", &self.storage.store_id())
            .field("workflows", &self.config.workflows.len())
            .finish_non_exhaustive()
    }
}
