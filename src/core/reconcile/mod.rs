//! Reconciliation of one source batch into the Query Directory
//!
//! A batch of candidate changes from one Admin Directory goes through a
//! single sequential pipeline:
//!
//! 1. [`authority`] decides which changes the source may make
//! 2. [`fetcher`] pulls in the Endpoints and Practitioners they reference
//! 3. [`rewriter`] maps source ids onto aggregate ids and placeholders
//! 4. [`transaction`] packs everything into one all-or-nothing Bundle
//!
//! Deleting an Organization also deletes the aggregate graph below it, and a
//! snapshot run can prune the aggregate records it no longer produces.

pub mod authority;
pub mod context;
pub mod fetcher;
pub mod rewriter;
pub mod transaction;

pub use authority::{resolve_authority, supersede, AuthorityOutcome, Rejection, RejectionReason};
pub use context::ReconciliationContext;
pub use fetcher::{fetch_additional, FetchSummary};
pub use rewriter::{rewrite, RewrittenChange, WriteTarget};
pub use transaction::TransactionBuilder;

use crate::adapters::fhir::OrganizationGraph;
use crate::adapters::registry::{AuthoritativeOrganization, RegistryClient};
use crate::adapters::{AdminDirectory, QueryDirectory};
use crate::domain::{Change, ResourceKind, ResourceRef, Result, Ura};
use crate::log_pipeline_complete;
use std::collections::HashSet;
use std::sync::Arc;

/// What one pipeline did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub received: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub fetched: usize,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    /// A transaction was committed
    pub submitted: bool,
    pub rejections: Vec<(ResourceRef, RejectionReason)>,
}

impl PipelineReport {
    /// Whether any rejection points at broken source data rather than policy
    pub fn has_cyclic_ownership(&self) -> bool {
        self.rejections
            .iter()
            .any(|(_, reason)| *reason == RejectionReason::CyclicOwnership)
    }
}

/// Runs one batch from one Admin Directory
pub struct ReconciliationPipeline<'a> {
    source: &'a AdminDirectory,
    context: ReconciliationContext,
    dry_run: bool,
}

impl<'a> ReconciliationPipeline<'a> {
    pub fn new(
        source: &'a AdminDirectory,
        query_directory: QueryDirectory,
        registry: Arc<dyn RegistryClient>,
    ) -> Self {
        Self {
            context: ReconciliationContext::new(source.source().clone(), query_directory, registry),
            source,
            dry_run: false,
        }
    }

    /// Build and log the transaction without submitting it
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Reuses a registry answer the caller already has
    pub fn with_authority(mut self, ura: Ura, authority: Option<AuthoritativeOrganization>) -> Self {
        self.context.seed_authority(ura, authority);
        self
    }

    /// Reconciles a batch of changes
    pub async fn run(self, changes: Vec<Change>) -> Result<PipelineReport> {
        self.execute(changes, None).await
    }

    /// Reconciles a snapshot and deletes every record of `existing` (an
    /// aggregate graph) that the snapshot no longer accounts for
    pub async fn run_with_prune(
        self,
        changes: Vec<Change>,
        existing: &OrganizationGraph,
    ) -> Result<PipelineReport> {
        self.execute(changes, Some(existing)).await
    }

    async fn execute(
        mut self,
        changes: Vec<Change>,
        existing: Option<&OrganizationGraph>,
    ) -> Result<PipelineReport> {
        let mut report = PipelineReport {
            received: changes.len(),
            ..Default::default()
        };

        let mut outcome = resolve_authority(changes, &mut self.context).await?;
        let fetch = fetch_additional(&mut outcome, self.source, &mut self.context).await?;
        report.fetched = fetch.fetched;
        report.accepted = outcome.accepted.len();
        report.rejected = outcome.rejected.len();

        for rejection in &outcome.rejected {
            match rejection.reason {
                RejectionReason::UntrackedDelete => tracing::debug!(
                    source = %self.source.source(),
                    resource = %rejection.change.key,
                    "Ignoring delete of untracked resource"
                ),
                reason => tracing::warn!(
                    source = %self.source.source(),
                    resource = %rejection.change.key,
                    reason = %reason,
                    "Change rejected"
                ),
            }
            report
                .rejections
                .push((rejection.change.key.clone(), rejection.reason));
        }

        let rewritten = rewrite(outcome.accepted, &mut self.context).await?;
        let kept: HashSet<String> = rewritten
            .iter()
            .filter(|change| change.resource.is_some())
            .map(|change| change.provenance.to_string())
            .collect();

        let mut builder = TransactionBuilder::new();
        let mut cascade_roots = Vec::new();
        for change in rewritten {
            if let WriteTarget::Delete { id } = &change.target {
                if change.key.kind == ResourceKind::Organization {
                    cascade_roots.push(id.clone());
                }
            }
            builder.add(change);
        }

        let query_directory = self.context.query_directory().clone();
        for root in cascade_roots {
            let graph = query_directory.organization_graph_by_id(&root).await?;
            tracing::debug!(
                source = %self.source.source(),
                organization = %root,
                resources = graph.len(),
                "Cascading organization delete"
            );
            for key in graph.keys() {
                builder.delete(key.clone());
            }
        }

        if let Some(existing) = existing {
            for resource in existing.resources() {
                let Some(key) = resource.local_ref() else {
                    continue;
                };
                if resource.provenance().is_some_and(|p| kept.contains(p)) {
                    continue;
                }
                tracing::debug!(source = %self.source.source(), resource = %key, "Pruning stale aggregate record");
                builder.delete(key);
            }
        }

        report.created = builder.creates();
        report.updated = builder.updates();
        report.deleted = builder.deletes();
        report.submitted = submit(&query_directory, builder, self.dry_run).await?;

        log_pipeline_complete!(self.source.source(), report);
        Ok(report)
    }
}

/// Deletes the aggregate graph of every organization carrying a URA
///
/// Returns the number of records deleted (or that would be, in dry-run).
pub async fn delete_organization(
    query_directory: &QueryDirectory,
    ura: &Ura,
    dry_run: bool,
) -> Result<usize> {
    let graph = query_directory.organization_graph_by_ura(ura).await?;
    let mut builder = TransactionBuilder::new();
    for key in graph.keys() {
        builder.delete(key.clone());
    }
    let deleted = builder.deletes();
    submit(query_directory, builder, dry_run).await?;

    tracing::info!(ura = %ura, deleted, dry_run, "Organization removed from aggregate");
    Ok(deleted)
}

/// Submits a built transaction; returns whether anything was committed
async fn submit(
    query_directory: &QueryDirectory,
    builder: TransactionBuilder,
    dry_run: bool,
) -> Result<bool> {
    if builder.is_empty() {
        tracing::debug!("Nothing to submit");
        return Ok(false);
    }

    let bundle = builder.build();
    let kinds = transaction::entries_by_kind(&bundle);
    if dry_run {
        tracing::info!(
            entries = bundle.entry.len(),
            kinds = ?kinds,
            "Dry run, transaction not submitted"
        );
        tracing::debug!(
            bundle = %serde_json::to_string(&bundle).unwrap_or_default(),
            "Dry run bundle"
        );
        return Ok(false);
    }

    query_directory.submit(&bundle).await?;
    tracing::debug!(entries = bundle.entry.len(), kinds = ?kinds, "Transaction submitted");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::fhir::InMemoryFhirStore;
    use crate::adapters::Lrza;
    use crate::domain::{ChangeMethod, Resource, SourceUrl, URA_SYSTEM};
    use serde_json::{json, Value};

    const SOURCE: &str = "https://ad.example.org/fhir";

    struct Fixture {
        aggregate: Arc<InMemoryFhirStore>,
        directory: AdminDirectory,
    }

    impl Fixture {
        fn new() -> Self {
            let source = SourceUrl::new(SOURCE).unwrap();
            Self {
                aggregate: Arc::new(InMemoryFhirStore::new("http://qd.example.org/fhir")),
                directory: AdminDirectory::new(
                    source.clone(),
                    Arc::new(InMemoryFhirStore::new(SOURCE)),
                ),
            }
        }

        fn pipeline(&self) -> ReconciliationPipeline<'_> {
            let registry = Arc::new(InMemoryFhirStore::new("http://lrza.example.org/fhir"));
            registry.set_unavailable(true);
            ReconciliationPipeline::new(
                &self.directory,
                QueryDirectory::new(self.aggregate.clone()),
                Arc::new(Lrza::new(registry)),
            )
            .with_authority(
                Ura::new("1234").unwrap(),
                Some(AuthoritativeOrganization {
                    name: Some("Zorggroep".to_string()),
                    endpoint: SourceUrl::new(SOURCE).unwrap(),
                }),
            )
        }
    }

    fn change(method: ChangeMethod, value: Value) -> Change {
        Change::upsert(method, Resource::from_json(value).unwrap()).unwrap()
    }

    fn organization() -> Value {
        json!({
            "resourceType": "Organization",
            "id": "o1",
            "identifier": [{"system": URA_SYSTEM, "value": "1234"}],
            "endpoint": [{"reference": "Endpoint/e1"}]
        })
    }

    #[tokio::test]
    async fn test_creates_in_one_transaction_and_is_idempotent() {
        let fixture = Fixture::new();
        let batch = || {
            vec![
                change(ChangeMethod::Create, organization()),
                change(ChangeMethod::Create, json!({"resourceType": "Endpoint", "id": "e1"})),
            ]
        };

        let report = fixture.pipeline().run(batch()).await.unwrap();
        assert_eq!((report.created, report.updated, report.deleted), (2, 0, 0));
        assert!(report.submitted);
        assert_eq!(fixture.aggregate.transactions().len(), 1);

        let organizations = fixture.aggregate.resources(ResourceKind::Organization);
        let endpoints = fixture.aggregate.resources(ResourceKind::Endpoint);
        assert_eq!(organizations.len(), 1);
        assert_eq!(organizations[0].name(), Some("Zorggroep"));
        let endpoint_ref = endpoints[0].local_ref().unwrap().to_reference();
        assert_eq!(
            organizations[0].body()["endpoint"],
            json!([{"reference": endpoint_ref}])
        );

        let again = fixture.pipeline().run(batch()).await.unwrap();
        assert_eq!((again.created, again.updated), (0, 2));
        assert_eq!(fixture.aggregate.len(), 2);
        assert!(fixture.aggregate.dangling_references().is_empty());
    }

    #[tokio::test]
    async fn test_organization_delete_cascades() {
        let fixture = Fixture::new();
        fixture
            .pipeline()
            .run(vec![
                change(ChangeMethod::Create, organization()),
                change(ChangeMethod::Create, json!({"resourceType": "Endpoint", "id": "e1"})),
                change(
                    ChangeMethod::Create,
                    json!({"resourceType": "Location", "id": "l1", "managingOrganization": {"reference": "Organization/o1"}}),
                ),
            ])
            .await
            .unwrap();
        assert_eq!(fixture.aggregate.len(), 3);

        let report = fixture
            .pipeline()
            .run(vec![Change::delete(ResourceRef::new(
                ResourceKind::Organization,
                "o1",
            ))])
            .await
            .unwrap();
        assert_eq!(report.deleted, 3);
        assert!(fixture.aggregate.is_empty());
    }

    #[tokio::test]
    async fn test_prune_removes_records_missing_from_snapshot() {
        let fixture = Fixture::new();
        fixture
            .pipeline()
            .run(vec![
                change(ChangeMethod::Create, organization()),
                change(ChangeMethod::Create, json!({"resourceType": "Endpoint", "id": "e1"})),
                change(
                    ChangeMethod::Create,
                    json!({"resourceType": "Location", "id": "l1", "managingOrganization": {"reference": "Organization/o1"}}),
                ),
            ])
            .await
            .unwrap();

        let query_directory = QueryDirectory::new(fixture.aggregate.clone());
        let existing = query_directory
            .organization_graph_by_ura(&Ura::new("1234").unwrap())
            .await
            .unwrap();
        let report = fixture
            .pipeline()
            .run_with_prune(
                vec![
                    change(ChangeMethod::Update, organization()),
                    change(ChangeMethod::Update, json!({"resourceType": "Endpoint", "id": "e1"})),
                ],
                &existing,
            )
            .await
            .unwrap();

        assert_eq!((report.updated, report.deleted), (2, 1));
        assert!(fixture.aggregate.resources(ResourceKind::Location).is_empty());
        assert_eq!(fixture.aggregate.len(), 2);
    }

    #[tokio::test]
    async fn test_dry_run_submits_nothing() {
        let fixture = Fixture::new();
        let report = fixture
            .pipeline()
            .dry_run(true)
            .run(vec![change(ChangeMethod::Create, organization())])
            .await
            .unwrap();
        assert_eq!(report.created, 1);
        assert!(!report.submitted);
        assert!(fixture.aggregate.transactions().is_empty());
    }

    #[tokio::test]
    async fn test_delete_organization_by_ura() {
        let fixture = Fixture::new();
        fixture
            .pipeline()
            .run(vec![change(ChangeMethod::Create, organization())])
            .await
            .unwrap();

        let query_directory = QueryDirectory::new(fixture.aggregate.clone());
        let deleted = delete_organization(&query_directory, &Ura::new("1234").unwrap(), false)
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(fixture.aggregate.is_empty());
    }
}
