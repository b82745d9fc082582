//! Query Directory adapter (the aggregate)

use super::fhir::{Bundle, FhirStore, OrganizationGraph, OrganizationGraphWalker};
use crate::domain::{Provenance, ResourceKind, Result, Ura, URA_SYSTEM};
use std::collections::BTreeSet;
use std::sync::Arc;

/// The aggregate directory kept in sync
#[derive(Clone)]
pub struct QueryDirectory {
    store: Arc<dyn FhirStore>,
}

impl QueryDirectory {
    pub fn new(store: Arc<dyn FhirStore>) -> Self {
        Self { store }
    }

    pub fn base_url(&self) -> &str {
        self.store.base_url()
    }

    /// Aggregate id of the record carrying this provenance, if it exists
    ///
    /// A `_source` search hit is confirmed with a read so that stale search
    /// indexes never yield a deleted record.
    pub async fn id_for(&self, provenance: &Provenance) -> Result<Option<String>> {
        let kind = provenance.key.kind;
        let result = self
            .store
            .search(kind, &[("_source", provenance.to_string())])
            .await?;

        if result.matches.len() > 1 {
            tracing::warn!(
                provenance = %provenance,
                count = result.matches.len(),
                "Provenance matches more than one aggregate record"
            );
        }
        let Some(id) = result.matches.first().and_then(|r| r.id()).map(str::to_string) else {
            return Ok(None);
        };

        match self.store.read(kind, &id).await {
            Ok(resource) => Ok(resource.id().map(str::to_string)),
            Err(e) if e.is_missing() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Every URA present on an aggregate Organization
    pub async fn all_uras(&self) -> Result<Vec<Ura>> {
        let result = self
            .store
            .search(
                ResourceKind::Organization,
                &[("identifier", format!("{URA_SYSTEM}|"))],
            )
            .await?;
        let uras: BTreeSet<Ura> = result.matches.iter().filter_map(|o| o.ura()).collect();
        Ok(uras.into_iter().collect())
    }

    /// Aggregate graph of every organization carrying a URA
    pub async fn organization_graph_by_ura(&self, ura: &Ura) -> Result<OrganizationGraph> {
        OrganizationGraphWalker::new(self.store.as_ref())
            .by_ura(ura)
            .await
    }

    /// Aggregate graph rooted at one Organization
    pub async fn organization_graph_by_id(&self, id: &str) -> Result<OrganizationGraph> {
        OrganizationGraphWalker::new(self.store.as_ref())
            .by_root_id(id)
            .await
    }

    /// Submits a transaction bundle
    pub async fn submit(&self, bundle: &Bundle) -> Result<Bundle> {
        let response = self.store.transaction(bundle).await?;
        tracing::debug!(
            base_url = %self.base_url(),
            entries = response.entry.len(),
            "Transaction committed"
        );
        Ok(response)
    }
}
