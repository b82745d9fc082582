//! Sync coordinator - main orchestrator for a sync run
//!
//! This module coordinates the whole update workflow: it asks the registry
//! which Admin Directory is authoritative for which organization, fans the
//! work out across sources, and moves the cursors forward for whatever
//! completed. Work reading from one source always runs in order, so a record
//! shared by two of its organizations is only ever created once.

use super::summary::{SyncError, SyncSummary};
use crate::adapters::admin_directory::{HttpSourceConnector, SourceConnector};
use crate::adapters::fhir::FhirClient;
use crate::adapters::registry::{AuthoritativeOrganization, RegistryChange, RegistryClient};
use crate::adapters::{Lrza, QueryDirectory};
use crate::config::AddressBookConfig;
use crate::core::reconcile::{delete_organization, PipelineReport, ReconciliationPipeline};
use crate::core::state::{FileStateStorage, StateManager, StateStorage, SyncState};
use crate::domain::{AddressBookError, Change, Result, SourceUrl, Ura};
use crate::log_skipped_unit;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

/// What a run synchronizes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMode {
    /// Rebuild every registry organization from its source's graph
    Full,
    /// Apply registry and source history since the cursors (or `since`)
    Incremental { since: Option<DateTime<Utc>> },
    /// Rebuild a single organization
    Organization { ura: Ura },
}

/// Sync coordinator
pub struct SyncCoordinator {
    registry: Arc<dyn RegistryClient>,
    query_directory: QueryDirectory,
    connector: Arc<dyn SourceConnector>,
    state_manager: StateManager,
    parallel_sources: usize,
    dry_run: bool,
    shutdown: watch::Receiver<bool>,
}

impl SyncCoordinator {
    /// Create a sync coordinator talking HTTP to every configured server
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be built from the configuration.
    pub fn new(config: &AddressBookConfig, shutdown: watch::Receiver<bool>) -> Result<Self> {
        let registry = Arc::new(Lrza::new(Arc::new(FhirClient::new(&config.registry)?)));
        let query_directory =
            QueryDirectory::new(Arc::new(FhirClient::new(&config.query_directory)?));
        let connector = Arc::new(HttpSourceConnector::new(config.admin_directory.clone()));
        let storage = Arc::new(FileStateStorage::new(&config.sync.state_directory));

        tracing::debug!(
            registry = %config.registry.base_url,
            query_directory = %config.query_directory.base_url,
            state_directory = %config.sync.state_directory,
            "Created sync coordinator"
        );

        Ok(Self::with_components(
            registry,
            query_directory,
            connector,
            storage,
            shutdown,
        )
        .parallel_sources(config.sync.parallel_sources)
        .dry_run(config.application.dry_run))
    }

    /// Create a sync coordinator from ready-made components
    pub fn with_components(
        registry: Arc<dyn RegistryClient>,
        query_directory: QueryDirectory,
        connector: Arc<dyn SourceConnector>,
        storage: Arc<dyn StateStorage>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            registry,
            query_directory,
            connector,
            state_manager: StateManager::new_with_storage(storage),
            parallel_sources: 4,
            dry_run: false,
            shutdown,
        }
    }

    /// Maximum number of organizations or sources processed at once
    pub fn parallel_sources(mut self, parallel_sources: usize) -> Self {
        self.parallel_sources = parallel_sources.max(1);
        self
    }

    /// Build transactions without submitting them and leave the state untouched
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self.state_manager.set_read_only(dry_run);
        self
    }

    fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn should_stop(&self, halt: &AtomicBool) -> bool {
        self.is_shutdown() || halt.load(Ordering::SeqCst)
    }

    /// Execute a sync run
    ///
    /// The accumulated state is saved on every exit path (except in dry-run),
    /// including when the run fails.
    ///
    /// # Errors
    ///
    /// Returns an error when the registry, the Query Directory or the state
    /// cannot be used, or when an incremental run has no starting point.
    pub async fn run(&self, mode: SyncMode) -> Result<SyncSummary> {
        let start_time = Instant::now();
        let mut summary = SyncSummary::new();

        tracing::info!(mode = ?mode, dry_run = self.dry_run, "Starting sync");

        let mut state = self.state_manager.load().await?;
        let result = match &mode {
            SyncMode::Full => self.full_sync(&mut state, &mut summary).await,
            SyncMode::Incremental { since } => {
                self.incremental_sync(&mut state, *since, &mut summary).await
            }
            SyncMode::Organization { ura } => {
                self.organization_sync(&mut state, ura, &mut summary).await
            }
        };
        summary.interrupted = self.is_shutdown();

        let saved = self.state_manager.save(&state).await;
        summary = summary.with_duration(start_time.elapsed());
        summary.log_summary();

        match (result, saved) {
            (Err(e), saved) => {
                if let Err(save_error) = saved {
                    tracing::error!(error = %save_error, "Failed to save sync state");
                }
                tracing::error!(error = %e, "Sync aborted");
                Err(e)
            }
            (Ok(()), Err(e)) => {
                tracing::error!(error = %e, "Failed to save sync state");
                Err(e)
            }
            (Ok(()), Ok(())) => Ok(summary),
        }
    }

    /// Runs one unit of work unless the run is stopping
    ///
    /// `None` means the unit never started. An infrastructural failure stops
    /// all units that have not started yet.
    async fn guarded<F>(&self, halt: &AtomicBool, work: F) -> Option<Result<PipelineReport>>
    where
        F: Future<Output = Result<PipelineReport>>,
    {
        if self.should_stop(halt) {
            return None;
        }
        let result = work.await;
        if matches!(&result, Err(e) if !e.is_operational()) {
            halt.store(true, Ordering::SeqCst);
        }
        Some(result)
    }

    /// Folds one unit result into the summary; the report when the unit succeeded
    fn absorb(
        &self,
        unit: &str,
        result: Option<Result<PipelineReport>>,
        summary: &mut SyncSummary,
        fatal: &mut Option<AddressBookError>,
    ) -> Option<PipelineReport> {
        match result {
            None => {
                tracing::debug!(unit = %unit, "Unit not started");
                None
            }
            Some(Ok(report)) => {
                summary.record(&report);
                if report.has_cyclic_ownership() {
                    // the rest of the batch is applied, the cycle is reported
                    let e = AddressBookError::CyclicOwnership(format!(
                        "ownership references loop in data from {unit}"
                    ));
                    log_skipped_unit!(unit, e);
                    summary.add_error(SyncError::from(&e).with_context(unit.to_string()));
                }
                Some(report)
            }
            Some(Err(e)) if e.is_operational() => {
                log_skipped_unit!(unit, e);
                summary.add_error(SyncError::from(&e).with_context(unit.to_string()));
                None
            }
            Some(Err(e)) => {
                tracing::error!(unit = %unit, error = %e, "Unit failed");
                summary.add_error(SyncError::from(&e).with_context(unit.to_string()));
                fatal.get_or_insert(e);
                None
            }
        }
    }

    /// Pulls an organization's graph from its source and replaces the
    /// aggregate copy with it
    async fn reconcile_organization(
        &self,
        ura: &Ura,
        endpoint: &SourceUrl,
        authority: Option<AuthoritativeOrganization>,
    ) -> Result<PipelineReport> {
        let source = self.connector.connect(endpoint)?;
        let name = authority.as_ref().and_then(|a| a.name.as_deref());
        let graph = source.organization_graph(ura, name).await?;
        let existing = self.query_directory.organization_graph_by_ura(ura).await?;
        let changes: Vec<Change> = graph
            .into_resources()
            .into_iter()
            .filter_map(Change::snapshot)
            .collect();

        let mut pipeline =
            ReconciliationPipeline::new(&source, self.query_directory.clone(), self.registry.clone())
                .dry_run(self.dry_run);
        if let Some(authority) = authority {
            pipeline = pipeline.with_authority(ura.clone(), Some(authority));
        }
        pipeline.run_with_prune(changes, &existing).await
    }

    async fn remove_organization(&self, ura: &Ura) -> Result<PipelineReport> {
        let deleted = delete_organization(&self.query_directory, ura, self.dry_run).await?;
        Ok(PipelineReport {
            deleted,
            submitted: deleted > 0 && !self.dry_run,
            ..Default::default()
        })
    }

    /// Applies a source's history since `since` (everything when `None`)
    async fn sync_source(
        &self,
        endpoint: &SourceUrl,
        since: Option<DateTime<Utc>>,
    ) -> Result<PipelineReport> {
        let source = self.connector.connect(endpoint)?;
        let changes = source.changes_since(since).await?;
        ReconciliationPipeline::new(&source, self.query_directory.clone(), self.registry.clone())
            .dry_run(self.dry_run)
            .run(changes)
            .await
    }

    async fn full_sync(&self, state: &mut SyncState, summary: &mut SyncSummary) -> Result<()> {
        let started_at = Utc::now();
        let organizations = self.registry.list_authoritative_organizations().await?;
        let mut leftover: BTreeSet<Ura> = self.query_directory.all_uras().await?.into_iter().collect();
        for organization in &organizations {
            leftover.remove(&organization.ura);
        }

        tracing::info!(
            organizations = organizations.len(),
            leftover = leftover.len(),
            "Full sync"
        );

        let halt = AtomicBool::new(false);
        let results: Vec<_> = stream::iter(by_source(&organizations, |o| Some(&o.endpoint)))
            .map(|group| {
                let halt = &halt;
                async move {
                    let mut results = Vec::with_capacity(group.len());
                    for organization in group {
                        let authority = AuthoritativeOrganization {
                            name: organization.name.clone(),
                            endpoint: organization.endpoint.clone(),
                        };
                        let result = self
                            .guarded(
                                halt,
                                self.reconcile_organization(
                                    &organization.ura,
                                    &organization.endpoint,
                                    Some(authority),
                                ),
                            )
                            .await;
                        results.push((organization, result));
                    }
                    results
                }
            })
            .buffer_unordered(self.parallel_sources)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .flatten()
            .collect();

        let mut fatal = None;
        let mut incomplete: HashSet<&SourceUrl> = HashSet::new();
        for (organization, result) in results {
            let unit = format!("{} ({})", organization.ura, organization.endpoint);
            match self.absorb(&unit, result, summary, &mut fatal) {
                Some(_) => summary.organizations += 1,
                None => {
                    incomplete.insert(&organization.endpoint);
                }
            }
        }

        if fatal.is_none() && !self.is_shutdown() {
            let results: Vec<_> = stream::iter(leftover.iter())
                .map(|ura| {
                    let halt = &halt;
                    async move { (ura, self.guarded(halt, self.remove_organization(ura)).await) }
                })
                .buffer_unordered(self.parallel_sources)
                .collect()
                .await;
            for (ura, result) in results {
                if self
                    .absorb(&format!("{ura} (left registry)"), result, summary, &mut fatal)
                    .is_some()
                {
                    summary.organizations_removed += 1;
                }
            }
        }

        if let Some(e) = fatal {
            return Err(e);
        }
        if self.is_shutdown() {
            tracing::warn!("Full sync interrupted, cursors left unchanged");
            return Ok(());
        }

        let designated: BTreeSet<SourceUrl> =
            organizations.iter().map(|o| o.endpoint.clone()).collect();
        state.replace_sources(designated.iter().cloned());
        state.set_registry_cursor(started_at);
        for source in designated.iter().filter(|s| !incomplete.contains(s)) {
            state.advance_source(source, started_at);
            summary.sources += 1;
        }
        Ok(())
    }

    async fn incremental_sync(
        &self,
        state: &mut SyncState,
        since: Option<DateTime<Utc>>,
        summary: &mut SyncSummary,
    ) -> Result<()> {
        let registry_since = since.or(state.registry_cursor()).ok_or_else(|| {
            AddressBookError::Configuration(
                "No registry cursor found; run a full sync first or pass --since".to_string(),
            )
        })?;

        let pulled_at = Utc::now();
        let changes = self.registry.changes_since(registry_since).await?;
        tracing::info!(
            since = %registry_since,
            changes = changes.len(),
            "Applying registry changes"
        );

        let halt = AtomicBool::new(false);
        let results: Vec<_> = stream::iter(by_source(&changes, |c| c.endpoint.as_ref()))
            .map(|group| {
                let halt = &halt;
                async move {
                    let mut results = Vec::with_capacity(group.len());
                    for change in group {
                        let result = self.guarded(halt, self.apply_registry_change(change)).await;
                        results.push((change, result));
                    }
                    results
                }
            })
            .buffer_unordered(self.parallel_sources)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .flatten()
            .collect();

        let mut fatal = None;
        let mut registry_complete = true;
        for (change, result) in results {
            let unit = match &change.endpoint {
                Some(endpoint) => format!("{} ({endpoint})", change.ura),
                None => format!("{} (left registry)", change.ura),
            };
            match self.absorb(&unit, result, summary, &mut fatal) {
                Some(_) => match &change.endpoint {
                    Some(endpoint) => {
                        summary.organizations += 1;
                        if state.track(endpoint) {
                            tracing::info!(source = %endpoint, "Tracking new Admin Directory");
                        }
                    }
                    None => summary.organizations_removed += 1,
                },
                None => registry_complete = false,
            }
        }
        if let Some(e) = fatal {
            return Err(e);
        }

        let sources: Vec<(SourceUrl, Option<DateTime<Utc>>)> = state
            .sources
            .iter()
            .map(|source| (source.clone(), since.or(state.source_cursor(source))))
            .collect();
        tracing::info!(sources = sources.len(), "Pulling source histories");

        let results: Vec<_> = stream::iter(sources.iter())
            .map(|(source, source_since)| {
                let halt = &halt;
                async move {
                    let pulled_at = Utc::now();
                    let result = self.guarded(halt, self.sync_source(source, *source_since)).await;
                    (source, pulled_at, result)
                }
            })
            .buffer_unordered(self.parallel_sources)
            .collect()
            .await;

        for (source, source_pulled_at, result) in results {
            if self
                .absorb(source.as_str(), result, summary, &mut fatal)
                .is_some()
            {
                summary.sources += 1;
                state.advance_source(source, source_pulled_at);
            }
        }
        if let Some(e) = fatal {
            return Err(e);
        }

        if registry_complete && !self.is_shutdown() {
            state.set_registry_cursor(pulled_at);
        } else {
            tracing::warn!("Registry changes incomplete, registry cursor left unchanged");
        }
        Ok(())
    }

    async fn apply_registry_change(&self, change: &RegistryChange) -> Result<PipelineReport> {
        match &change.endpoint {
            None => self.remove_organization(&change.ura).await,
            Some(endpoint) => {
                let authority = AuthoritativeOrganization {
                    name: change.name.clone(),
                    endpoint: endpoint.clone(),
                };
                self.reconcile_organization(&change.ura, endpoint, Some(authority))
                    .await
            }
        }
    }

    async fn organization_sync(
        &self,
        state: &mut SyncState,
        ura: &Ura,
        summary: &mut SyncSummary,
    ) -> Result<()> {
        let mut fatal = None;
        match self.registry.designated_endpoint(ura).await {
            Ok(endpoint) => {
                tracing::info!(ura = %ura, source = %endpoint, "Organization sync");
                let result = self.reconcile_organization(ura, &endpoint, None).await;
                let unit = format!("{ura} ({endpoint})");
                if self.absorb(&unit, Some(result), summary, &mut fatal).is_some() {
                    summary.organizations += 1;
                    state.track(&endpoint);
                }
            }
            Err(AddressBookError::NotAuthoritative(message)) => {
                tracing::warn!(ura = %ura, reason = %message, "Organization not designated, removing");
                let result = self.remove_organization(ura).await;
                if self
                    .absorb(&format!("{ura} (not designated)"), Some(result), summary, &mut fatal)
                    .is_some()
                {
                    summary.organizations_removed += 1;
                }
            }
            Err(e) => return Err(e),
        }
        match fatal {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Splits units into one ordered group per source
///
/// Units without a source (registry removals) share a group.
fn by_source<T>(units: &[T], source: impl Fn(&T) -> Option<&SourceUrl>) -> Vec<Vec<&T>> {
    let mut groups: BTreeMap<Option<&SourceUrl>, Vec<&T>> = BTreeMap::new();
    for unit in units {
        groups.entry(source(unit)).or_default().push(unit);
    }
    groups.into_values().collect()
}
