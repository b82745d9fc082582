//! Registry client (LRZa)
//!
//! The registry lists every healthcare organization by URA together with the
//! Endpoint of the Admin Directory that is authoritative for it.

use super::fhir::{FhirStore, HistoryEntry};
use crate::domain::{
    AddressBookError, ChangeMethod, Resource, ResourceKind, ResourceRef, Result, SourceUrl, Ura,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Profile marking an Endpoint as a generic-functions Admin Directory endpoint
pub const ENDPOINT_PROFILE: &str =
    "http://nuts-foundation.github.io/nl-generic-functions-ig/StructureDefinition/nl-gf-endpoint";

/// Code system of the generic-functions data exchange capabilities
pub const CAPABILITIES_SYSTEM: &str =
    "http://nuts-foundation.github.io/nl-generic-functions-ig/CodeSystem/nl-gf-data-exchange-capabilities";

/// Capability code carried by Admin Directory endpoints
pub const ADMIN_DIRECTORY_CAPABILITY: &str =
    "http://nuts-foundation.github.io/nl-generic-functions-ig/CapabilityStatement/nl-gf-admin-directory-update-client";

/// An organization with its designated Admin Directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryOrganization {
    pub ura: Ura,
    pub name: Option<String>,
    pub endpoint: SourceUrl,
}

/// Answer to "who is authoritative for this URA"
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthoritativeOrganization {
    pub name: Option<String>,
    pub endpoint: SourceUrl,
}

/// Most recent registry change for one organization
///
/// `endpoint` is `None` when the organization was removed from the registry or
/// no longer designates an Admin Directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryChange {
    pub ura: Ura,
    pub name: Option<String>,
    pub endpoint: Option<SourceUrl>,
}

/// Authority lookups against the registry
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Every organization with a URA and a designated Admin Directory
    async fn list_authoritative_organizations(&self) -> Result<Vec<RegistryOrganization>>;

    /// The designated Admin Directory for one URA, if any
    async fn authoritative_organization(&self, ura: &Ura) -> Result<Option<AuthoritativeOrganization>>;

    /// Organizations changed since `since`, oldest first, one entry per organization
    async fn changes_since(&self, since: DateTime<Utc>) -> Result<Vec<RegistryChange>>;

    /// The designated Admin Directory for one URA
    ///
    /// # Errors
    ///
    /// Returns [`AddressBookError::NotAuthoritative`] when the registry
    /// designates none.
    async fn designated_endpoint(&self, ura: &Ura) -> Result<SourceUrl> {
        self.authoritative_organization(ura)
            .await?
            .map(|organization| organization.endpoint)
            .ok_or_else(|| {
                AddressBookError::NotAuthoritative(format!(
                    "Registry designates no Admin Directory for URA {ura}"
                ))
            })
    }
}

/// [`RegistryClient`] backed by the LRZa FHIR API
pub struct Lrza {
    store: Arc<dyn FhirStore>,
}

impl Lrza {
    pub fn new(store: Arc<dyn FhirStore>) -> Self {
        Self { store }
    }

    /// Recovers the last known version of a deleted organization
    async fn last_version(&self, id: &str) -> Result<Option<Resource>> {
        let versions = self
            .store
            .history(ResourceKind::Organization, Some(id), None)
            .await?;
        Ok(versions.into_iter().find_map(|entry| entry.resource))
    }
}

#[async_trait]
impl RegistryClient for Lrza {
    async fn list_authoritative_organizations(&self) -> Result<Vec<RegistryOrganization>> {
        let result = self
            .store
            .search(
                ResourceKind::Organization,
                &[("_include", "Organization:endpoint".to_string())],
            )
            .await?;
        let endpoints = index(result.includes);

        let mut organizations = Vec::new();
        for organization in result.matches {
            let name = organization.name().map(str::to_string);
            let Some(ura) = organization.ura() else {
                tracing::warn!(
                    organization = ?organization.local_ref(),
                    name = ?name,
                    "Registry organization has no URA identifier"
                );
                continue;
            };
            let Some(endpoint) = designated_endpoint(&organization, &endpoints) else {
                tracing::warn!(ura = %ura, name = ?name, "Registry organization has no Admin Directory endpoint");
                continue;
            };
            organizations.push(RegistryOrganization {
                ura,
                name,
                endpoint,
            });
        }

        tracing::info!(count = organizations.len(), "Listed registry organizations");
        Ok(organizations)
    }

    async fn authoritative_organization(&self, ura: &Ura) -> Result<Option<AuthoritativeOrganization>> {
        let result = self
            .store
            .search(
                ResourceKind::Organization,
                &[
                    ("identifier", ura.search_token()),
                    ("_include", "Organization:endpoint".to_string()),
                ],
            )
            .await?;
        let endpoints = index(result.includes);

        let found = result.matches.iter().find_map(|organization| {
            designated_endpoint(organization, &endpoints).map(|endpoint| AuthoritativeOrganization {
                name: organization.name().map(str::to_string),
                endpoint,
            })
        });
        if found.is_none() {
            tracing::debug!(ura = %ura, "Registry designates no Admin Directory");
        }
        Ok(found)
    }

    async fn changes_since(&self, since: DateTime<Utc>) -> Result<Vec<RegistryChange>> {
        let mut history = self
            .store
            .history(ResourceKind::Organization, None, Some(since))
            .await?;
        history.reverse();

        // Only the most recent entry per organization counts
        let mut latest: Vec<(ResourceRef, HistoryEntry)> = Vec::new();
        for entry in history {
            let Some(key) = entry.target() else {
                tracing::warn!(url = %entry.url, "Skipping registry history entry without target");
                continue;
            };
            latest.retain(|(existing, _)| *existing != key);
            latest.push((key, entry));
        }

        let mut changed = Vec::new();
        for (key, entry) in latest {
            let deleted = entry.method == ChangeMethod::Delete;
            let organization = match entry.resource {
                Some(resource) if !deleted => Some(resource),
                _ => self.last_version(&key.id).await?,
            };
            let Some(organization) = organization else {
                tracing::warn!(organization = %key, "Deleted registry organization has no prior version");
                continue;
            };
            let Some(ura) = organization.ura() else {
                tracing::warn!(organization = %key, "Registry organization has no URA identifier");
                continue;
            };
            changed.push((ura, organization, deleted));
        }

        let endpoint_ids: Vec<String> = changed
            .iter()
            .filter(|(_, _, deleted)| !deleted)
            .flat_map(|(_, organization, _)| endpoint_references(organization))
            .map(|reference| reference.id)
            .collect();
        let endpoints = if endpoint_ids.is_empty() {
            HashMap::new()
        } else {
            let found = self
                .store
                .search(ResourceKind::Endpoint, &[("_id", endpoint_ids.join(","))])
                .await?;
            index(found.matches)
        };

        let changes: Vec<RegistryChange> = changed
            .into_iter()
            .map(|(ura, organization, deleted)| {
                let endpoint = if deleted {
                    None
                } else {
                    let endpoint = designated_endpoint(&organization, &endpoints);
                    if endpoint.is_none() {
                        tracing::warn!(
                            ura = %ura,
                            "Registry organization no longer designates an Admin Directory"
                        );
                    }
                    endpoint
                };
                RegistryChange {
                    ura,
                    name: organization.name().map(str::to_string),
                    endpoint,
                }
            })
            .collect();

        tracing::info!(since = %since, count = changes.len(), "Read registry changes");
        Ok(changes)
    }
}

fn index(resources: Vec<Resource>) -> HashMap<ResourceRef, Resource> {
    resources
        .into_iter()
        .filter_map(|resource| resource.local_ref().map(|key| (key, resource)))
        .collect()
}

fn endpoint_references(organization: &Resource) -> Vec<ResourceRef> {
    organization
        .all_references()
        .into_iter()
        .filter(|reference| reference.kind == ResourceKind::Endpoint)
        .collect()
}

/// Picks the Admin Directory endpoint of a registry organization.
///
/// An Endpoint declaring the generic-functions endpoint profile wins; otherwise
/// the first one carrying the Admin Directory capability in `payloadType`.
fn designated_endpoint(
    organization: &Resource,
    endpoints: &HashMap<ResourceRef, Resource>,
) -> Option<SourceUrl> {
    let candidates: Vec<&Resource> = endpoint_references(organization)
        .iter()
        .filter_map(|reference| endpoints.get(reference))
        .collect();

    let chosen = candidates
        .iter()
        .find(|endpoint| endpoint.profiles().contains(&ENDPOINT_PROFILE))
        .or_else(|| candidates.iter().find(|endpoint| has_admin_capability(endpoint)))?;

    let address = chosen.body().get("address").and_then(Value::as_str)?;
    match SourceUrl::new(address) {
        Ok(url) => Some(url),
        Err(e) => {
            tracing::warn!(address = %address, error = %e, "Ignoring endpoint with invalid address");
            None
        }
    }
}

fn has_admin_capability(endpoint: &Resource) -> bool {
    endpoint
        .body()
        .get("payloadType")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|payload| payload.get("coding").and_then(Value::as_array))
        .flatten()
        .any(|coding| {
            coding.get("system").and_then(Value::as_str) == Some(CAPABILITIES_SYSTEM)
                && coding.get("code").and_then(Value::as_str) == Some(ADMIN_DIRECTORY_CAPABILITY)
        })
}
