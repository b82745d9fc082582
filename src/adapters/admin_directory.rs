//! Admin Directory adapter (a source)
//!
//! Every failure talking to an Admin Directory is passed through
//! [`AddressBookError::from_source`], so an unreachable or misbehaving source
//! surfaces as an operational error.

#[cfg(any(test, feature = "test-support"))]
use super::fhir::InMemoryFhirStore;
use super::fhir::{FhirClient, FhirStore, OrganizationGraph, OrganizationGraphWalker};
use crate::config::AdminDirectoryConfig;
use crate::domain::{
    AddressBookError, Change, ChangeMethod, Resource, ResourceKind, ResourceRef, Result, SourceUrl,
    Ura,
};
use chrono::{DateTime, Utc};
#[cfg(any(test, feature = "test-support"))]
use std::collections::HashMap;
use std::sync::Arc;

/// One Admin Directory
#[derive(Clone)]
pub struct AdminDirectory {
    source: SourceUrl,
    store: Arc<dyn FhirStore>,
}

impl AdminDirectory {
    pub fn new(source: SourceUrl, store: Arc<dyn FhirStore>) -> Self {
        Self { source, store }
    }

    pub fn source(&self) -> &SourceUrl {
        &self.source
    }

    fn wrap(&self, err: AddressBookError) -> AddressBookError {
        AddressBookError::from_source(self.source.as_str(), err)
    }

    /// The organization graph for a URA
    ///
    /// Root organizations get the registry's canonical `name` (when given) and a
    /// normalized URA identifier.
    pub async fn organization_graph(&self, ura: &Ura, name: Option<&str>) -> Result<OrganizationGraph> {
        let mut graph = OrganizationGraphWalker::new(self.store.as_ref())
            .by_ura(ura)
            .await
            .map_err(|e| self.wrap(e))?;

        for organization in graph
            .resources_mut()
            .iter_mut()
            .filter(|r| r.kind() == ResourceKind::Organization)
        {
            if organization.ura().as_ref() != Some(ura) {
                continue;
            }
            organization.set_ura(ura);
            if let Some(name) = name {
                organization.set_name(name);
            }
        }

        tracing::debug!(
            source = %self.source,
            ura = %ura,
            resources = graph.len(),
            "Pulled organization graph"
        );
        Ok(graph)
    }

    /// Reads a single resource
    pub async fn read(&self, key: &ResourceRef) -> Result<Resource> {
        self.store
            .read(key.kind, &key.id)
            .await
            .map_err(|e| self.wrap(e))
    }

    /// Changes since a cursor, oldest first per kind
    ///
    /// Without a cursor the full history is returned.
    pub async fn changes_since(&self, since: Option<DateTime<Utc>>) -> Result<Vec<Change>> {
        let mut changes = Vec::new();
        for kind in ResourceKind::ALL {
            let mut entries = self
                .store
                .history(kind, None, since)
                .await
                .map_err(|e| self.wrap(e))?;
            entries.reverse();

            for entry in entries {
                let Some(key) = entry.target() else {
                    tracing::warn!(source = %self.source, url = %entry.url, "History entry without target");
                    continue;
                };
                let change = if entry.method == ChangeMethod::Delete {
                    Some(Change::delete(key.clone()))
                } else {
                    entry
                        .resource
                        .and_then(|resource| Change::upsert(entry.method, resource))
                };
                match change {
                    Some(change) => changes.push(change),
                    None => {
                        tracing::warn!(source = %self.source, resource = %key, "History entry without resource");
                    }
                }
            }
        }

        tracing::info!(
            source = %self.source,
            since = ?since,
            count = changes.len(),
            "Pulled history"
        );
        Ok(changes)
    }
}

/// Opens Admin Directories by base URL
pub trait SourceConnector: Send + Sync {
    fn connect(&self, source: &SourceUrl) -> Result<AdminDirectory>;
}

/// Connects to Admin Directories over HTTP using the shared `[admin_directory]`
/// settings
pub struct HttpSourceConnector {
    config: AdminDirectoryConfig,
}

impl HttpSourceConnector {
    pub fn new(config: AdminDirectoryConfig) -> Self {
        Self { config }
    }
}

impl SourceConnector for HttpSourceConnector {
    fn connect(&self, source: &SourceUrl) -> Result<AdminDirectory> {
        let client = FhirClient::new(&self.config.server_config(source.as_str())).map_err(|e| {
            AddressBookError::SourceUnavailable {
                source_url: source.to_string(),
                message: e.to_string(),
            }
        })?;
        Ok(AdminDirectory::new(source.clone(), Arc::new(client)))
    }
}

/// Serves a fixed set of in-memory Admin Directories
#[cfg(any(test, feature = "test-support"))]
#[derive(Default)]
pub struct StaticSourceConnector {
    sources: HashMap<SourceUrl, Arc<InMemoryFhirStore>>,
}

#[cfg(any(test, feature = "test-support"))]
impl StaticSourceConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: SourceUrl, store: Arc<InMemoryFhirStore>) -> Self {
        self.sources.insert(source, store);
        self
    }
}

#[cfg(any(test, feature = "test-support"))]
impl SourceConnector for StaticSourceConnector {
    fn connect(&self, source: &SourceUrl) -> Result<AdminDirectory> {
        let store = self
            .sources
            .get(source)
            .ok_or_else(|| AddressBookError::SourceUnavailable {
                source_url: source.to_string(),
                message: "unknown source".to_string(),
            })?;
        Ok(AdminDirectory::new(source.clone(), store.clone()))
    }
}
