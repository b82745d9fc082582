//! Shared fixtures: an in-memory registry, Query Directory and two Admin
//! Directories wired into a coordinator.

#![allow(dead_code)]

use addressbook_sync::adapters::fhir::{Bundle, FhirStore, HistoryEntry, InMemoryFhirStore, SearchResult};
use addressbook_sync::adapters::registry::{ADMIN_DIRECTORY_CAPABILITY, CAPABILITIES_SYSTEM};
use addressbook_sync::adapters::{Lrza, QueryDirectory, StaticSourceConnector};
use addressbook_sync::core::state::MemoryStateStorage;
use addressbook_sync::core::sync::SyncCoordinator;
use addressbook_sync::domain::{
    FhirError, Resource, ResourceKind, Result, SourceUrl, Ura, URA_SYSTEM,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::watch;

pub const REGISTRY: &str = "https://lrza.example.org/fhir";
pub const QUERY_DIRECTORY: &str = "http://query-directory.example.org/fhir";
pub const SOURCE_A: &str = "https://ad-a.example.org/fhir";
pub const SOURCE_B: &str = "https://ad-b.example.org/fhir";

pub struct Network {
    pub registry: Arc<InMemoryFhirStore>,
    pub aggregate: Arc<InMemoryFhirStore>,
    pub source_a: Arc<InMemoryFhirStore>,
    pub source_b: Arc<InMemoryFhirStore>,
    pub storage: Arc<MemoryStateStorage>,
    shutdown_tx: watch::Sender<bool>,
}

impl Network {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            registry: Arc::new(InMemoryFhirStore::new(REGISTRY)),
            aggregate: Arc::new(InMemoryFhirStore::new(QUERY_DIRECTORY)),
            source_a: Arc::new(InMemoryFhirStore::new(SOURCE_A)),
            source_b: Arc::new(InMemoryFhirStore::new(SOURCE_B)),
            storage: Arc::new(MemoryStateStorage::default()),
            shutdown_tx,
        }
    }

    /// Registers `ura` in the registry with `address` as its Admin Directory
    pub fn register(&self, ura: &str, name: &str, address: &str) {
        let endpoint_id = format!("e{ura}");
        self.registry
            .put(json!({
                "resourceType": "Endpoint",
                "id": endpoint_id,
                "address": address,
                "payloadType": [{"coding": [{"system": CAPABILITIES_SYSTEM, "code": ADMIN_DIRECTORY_CAPABILITY}]}]
            }))
            .unwrap();
        self.registry
            .put(json!({
                "resourceType": "Organization",
                "id": format!("r{ura}"),
                "name": name,
                "identifier": [{"system": URA_SYSTEM, "value": ura}],
                "endpoint": [{"reference": format!("Endpoint/{endpoint_id}")}]
            }))
            .unwrap();
    }

    /// Drops `ura` from the registry
    pub fn unregister(&self, ura: &str) {
        assert!(self
            .registry
            .remove(ResourceKind::Organization, &format!("r{ura}")));
    }

    pub fn coordinator(&self) -> SyncCoordinator {
        self.coordinator_over(self.aggregate.clone())
    }

    /// A coordinator writing to the aggregate through `aggregate`
    pub fn coordinator_over(&self, aggregate: Arc<dyn FhirStore>) -> SyncCoordinator {
        let connector = StaticSourceConnector::new()
            .with_source(SourceUrl::new(SOURCE_A).unwrap(), self.source_a.clone())
            .with_source(SourceUrl::new(SOURCE_B).unwrap(), self.source_b.clone());
        SyncCoordinator::with_components(
            Arc::new(Lrza::new(self.registry.clone())),
            QueryDirectory::new(aggregate),
            Arc::new(connector),
            self.storage.clone(),
            self.shutdown_tx.subscribe(),
        )
        .parallel_sources(2)
    }

    pub fn shut_down(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// The aggregate record copied from `source`/`Kind`/`id`
    pub fn copy_of(&self, source: &str, kind: ResourceKind, id: &str) -> Option<Resource> {
        let provenance = format!("{source}/{kind}/{id}");
        self.aggregate
            .resources(kind)
            .into_iter()
            .find(|resource| resource.provenance() == Some(provenance.as_str()))
    }
}

pub fn organization(id: &str, ura: &str, name: &str) -> Value {
    json!({
        "resourceType": "Organization",
        "id": id,
        "name": name,
        "identifier": [{"system": URA_SYSTEM, "value": ura}],
        "endpoint": [{"reference": format!("Endpoint/{id}-ep")}]
    })
}

pub fn endpoint(id: &str, address: &str) -> Value {
    json!({
        "resourceType": "Endpoint",
        "id": id,
        "status": "active",
        "address": address
    })
}

pub fn location(id: &str, organization: &str, name: &str) -> Value {
    json!({
        "resourceType": "Location",
        "id": id,
        "name": name,
        "managingOrganization": {"reference": format!("Organization/{organization}")}
    })
}

/// Puts an organization with its endpoint and one location into `store`
pub fn seed_organization(store: &InMemoryFhirStore, id: &str, ura: &str, name: &str) {
    store.put(organization(id, ura, name)).unwrap();
    store
        .put(endpoint(&format!("{id}-ep"), "https://fhir.example.org/ep"))
        .unwrap();
    store
        .put(location(&format!("{id}-loc"), id, "Hoofdlocatie"))
        .unwrap();
}

pub fn ura(value: &str) -> Ura {
    Ura::new(value).unwrap()
}

/// Hands control back to the runtime before every call, so concurrent
/// pipelines interleave
pub struct YieldingStore(pub Arc<InMemoryFhirStore>);

#[async_trait]
impl FhirStore for YieldingStore {
    async fn read(&self, kind: ResourceKind, id: &str) -> Result<Resource> {
        tokio::task::yield_now().await;
        self.0.read(kind, id).await
    }

    async fn search(&self, kind: ResourceKind, params: &[(&str, String)]) -> Result<SearchResult> {
        tokio::task::yield_now().await;
        self.0.search(kind, params).await
    }

    async fn history(
        &self,
        kind: ResourceKind,
        id: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<HistoryEntry>> {
        tokio::task::yield_now().await;
        self.0.history(kind, id, since).await
    }

    async fn transaction(&self, bundle: &Bundle) -> Result<Bundle> {
        tokio::task::yield_now().await;
        self.0.transaction(bundle).await
    }

    fn base_url(&self) -> &str {
        self.0.base_url()
    }
}

/// Fails every transaction carrying records copied from `source`
pub struct RefusingStore {
    pub inner: Arc<InMemoryFhirStore>,
    pub source: &'static str,
}

#[async_trait]
impl FhirStore for RefusingStore {
    async fn read(&self, kind: ResourceKind, id: &str) -> Result<Resource> {
        self.inner.read(kind, id).await
    }

    async fn search(&self, kind: ResourceKind, params: &[(&str, String)]) -> Result<SearchResult> {
        self.inner.search(kind, params).await
    }

    async fn history(
        &self,
        kind: ResourceKind,
        id: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<HistoryEntry>> {
        self.inner.history(kind, id, since).await
    }

    async fn transaction(&self, bundle: &Bundle) -> Result<Bundle> {
        let body = serde_json::to_string(bundle)?;
        if body.contains(self.source) {
            return Err(FhirError::ServerError {
                status: 503,
                message: "transaction refused".to_string(),
            }
            .into());
        }
        self.inner.transaction(bundle).await
    }

    fn base_url(&self) -> &str {
        self.inner.base_url()
    }
}
