//! Per-pipeline lookup caches
//!
//! A [`ReconciliationContext`] lives exactly as long as one source batch. It
//! memoizes Identity Mapper answers (source-local key to aggregate id) and
//! registry authority lookups, so a batch never asks the same question twice
//! and nothing leaks between pipelines.

use crate::adapters::registry::{AuthoritativeOrganization, RegistryClient};
use crate::adapters::QueryDirectory;
use crate::domain::{Provenance, ResourceRef, Result, SourceUrl, Ura};
use std::collections::HashMap;
use std::sync::Arc;

pub struct ReconciliationContext {
    source: SourceUrl,
    query_directory: QueryDirectory,
    registry: Arc<dyn RegistryClient>,
    identities: HashMap<ResourceRef, Option<String>>,
    authorities: HashMap<Ura, Option<AuthoritativeOrganization>>,
}

impl ReconciliationContext {
    pub fn new(
        source: SourceUrl,
        query_directory: QueryDirectory,
        registry: Arc<dyn RegistryClient>,
    ) -> Self {
        Self {
            source,
            query_directory,
            registry,
            identities: HashMap::new(),
            authorities: HashMap::new(),
        }
    }

    pub fn source(&self) -> &SourceUrl {
        &self.source
    }

    pub fn query_directory(&self) -> &QueryDirectory {
        &self.query_directory
    }

    /// Provenance of a source-local key from this pipeline's source
    pub fn provenance(&self, key: &ResourceRef) -> Provenance {
        Provenance::new(&self.source, key)
    }

    /// Seeds the registry answer for a URA the caller already resolved
    pub fn seed_authority(&mut self, ura: Ura, authority: Option<AuthoritativeOrganization>) {
        self.authorities.entry(ura).or_insert(authority);
    }

    /// Aggregate id of the record holding this source-local key, if any
    ///
    /// The first answer per key is kept for the rest of the pipeline.
    pub async fn aggregate_id(&mut self, key: &ResourceRef) -> Result<Option<String>> {
        if let Some(known) = self.identities.get(key) {
            return Ok(known.clone());
        }
        let id = self.query_directory.id_for(&self.provenance(key)).await?;
        tracing::trace!(source = %self.source, key = %key, aggregate_id = ?id, "Identity lookup");
        Ok(self.identities.entry(key.clone()).or_insert(id).clone())
    }

    /// The registry's designated Admin Directory and canonical name for a URA
    pub async fn authority(&mut self, ura: &Ura) -> Result<Option<AuthoritativeOrganization>> {
        if let Some(known) = self.authorities.get(ura) {
            return Ok(known.clone());
        }
        let authority = self.registry.authoritative_organization(ura).await?;
        Ok(self
            .authorities
            .entry(ura.clone())
            .or_insert(authority)
            .clone())
    }

    /// Whether the registry currently designates this pipeline's source for a URA
    pub async fn is_designated(&mut self, ura: &Ura) -> Result<bool> {
        Ok(self
            .authority(ura)
            .await?
            .is_some_and(|authority| authority.endpoint == self.source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::fhir::InMemoryFhirStore;
    use crate::adapters::Lrza;
    use crate::domain::ResourceKind;
    use serde_json::json;

    fn source() -> SourceUrl {
        SourceUrl::new("https://ad.example.org/fhir").unwrap()
    }

    #[tokio::test]
    async fn test_identity_answer_is_kept() {
        let aggregate = Arc::new(InMemoryFhirStore::new("http://qd.example.org/fhir"));
        aggregate
            .put(json!({
                "resourceType": "Location",
                "id": "100",
                "meta": {"source": "https://ad.example.org/fhir/Location/l1"}
            }))
            .unwrap();
        let registry = Arc::new(Lrza::new(Arc::new(InMemoryFhirStore::new(
            "http://lrza.example.org/fhir",
        ))));
        let mut context =
            ReconciliationContext::new(source(), QueryDirectory::new(aggregate.clone()), registry);

        let key = ResourceRef::new(ResourceKind::Location, "l1");
        assert_eq!(context.aggregate_id(&key).await.unwrap(), Some("100".to_string()));

        aggregate.remove(ResourceKind::Location, "100");
        assert_eq!(context.aggregate_id(&key).await.unwrap(), Some("100".to_string()));
    }

    #[tokio::test]
    async fn test_seeded_authority_skips_registry() {
        let registry_store = Arc::new(InMemoryFhirStore::new("http://lrza.example.org/fhir"));
        registry_store.set_unavailable(true);
        let mut context = ReconciliationContext::new(
            source(),
            QueryDirectory::new(Arc::new(InMemoryFhirStore::new("http://qd.example.org/fhir"))),
            Arc::new(Lrza::new(registry_store)),
        );

        let ura = Ura::new("1234").unwrap();
        context.seed_authority(
            ura.clone(),
            Some(AuthoritativeOrganization {
                name: Some("Zorg".to_string()),
                endpoint: source(),
            }),
        );
        assert!(context.is_designated(&ura).await.unwrap());
        assert!(context.is_designated(&Ura::new("5678").unwrap()).await.is_err());
    }
}
