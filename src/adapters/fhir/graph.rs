//! Organization graph walker
//!
//! Collects everything that hangs off an organization: the organization itself,
//! its `partOf` sub-organizations (transitively), their Endpoints, Locations,
//! PractitionerRoles with their Practitioners, HealthcareServices, and the
//! Endpoints those HealthcareServices reference.

use super::FhirStore;
use crate::domain::{Resource, ResourceKind, ResourceRef, Result, Ura};
use std::collections::{HashSet, VecDeque};

/// All resources of one organization graph, deduplicated
#[derive(Debug, Clone, Default)]
pub struct OrganizationGraph {
    resources: Vec<Resource>,
    keys: HashSet<ResourceRef>,
}

impl OrganizationGraph {
    fn add(&mut self, resource: Resource) -> bool {
        let Some(key) = resource.local_ref() else {
            return false;
        };
        if !self.keys.insert(key) {
            return false;
        }
        self.resources.push(resource);
        true
    }

    pub fn contains(&self, key: &ResourceRef) -> bool {
        self.keys.contains(key)
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn resources_mut(&mut self) -> &mut [Resource] {
        &mut self.resources
    }

    /// Resources of one kind, in discovery order
    pub fn of_kind(&self, kind: ResourceKind) -> impl Iterator<Item = &Resource> {
        self.resources.iter().filter(move |r| r.kind() == kind)
    }

    /// `Kind/id` of every resource in the graph
    pub fn keys(&self) -> impl Iterator<Item = &ResourceRef> {
        self.keys.iter()
    }

    pub fn into_resources(self) -> Vec<Resource> {
        self.resources
    }
}

/// Walks organization graphs on one FHIR store
pub struct OrganizationGraphWalker<'a> {
    store: &'a dyn FhirStore,
}

impl<'a> OrganizationGraphWalker<'a> {
    pub fn new(store: &'a dyn FhirStore) -> Self {
        Self { store }
    }

    /// Graph of every organization carrying the given URA
    pub async fn by_ura(&self, ura: &Ura) -> Result<OrganizationGraph> {
        let roots = self
            .store
            .search(
                ResourceKind::Organization,
                &[
                    ("identifier", ura.search_token()),
                    ("_include", "Organization:endpoint".to_string()),
                ],
            )
            .await?;
        self.expand(roots.matches, roots.includes).await
    }

    /// Graph rooted at one organization; empty when it does not exist
    pub async fn by_root_id(&self, id: &str) -> Result<OrganizationGraph> {
        let roots = self
            .store
            .search(
                ResourceKind::Organization,
                &[
                    ("_id", id.to_string()),
                    ("_include", "Organization:endpoint".to_string()),
                ],
            )
            .await?;
        self.expand(roots.matches, roots.includes).await
    }

    async fn expand(&self, roots: Vec<Resource>, includes: Vec<Resource>) -> Result<OrganizationGraph> {
        let mut graph = OrganizationGraph::default();
        if roots.is_empty() {
            return Ok(graph);
        }

        let mut organization_ids = Vec::new();
        let mut frontier = VecDeque::new();
        for root in roots {
            if let Some(id) = root.id().map(str::to_string) {
                if graph.add(root) {
                    organization_ids.push(id.clone());
                    frontier.push_back(id);
                }
            }
        }
        includes.into_iter().for_each(|endpoint| {
            graph.add(endpoint);
        });

        while let Some(parent) = frontier.pop_front() {
            let children = self
                .store
                .search(
                    ResourceKind::Organization,
                    &[
                        ("partof", format!("Organization/{parent}")),
                        ("_include", "Organization:endpoint".to_string()),
                    ],
                )
                .await?;
            for child in children.matches {
                if let Some(id) = child.id().map(str::to_string) {
                    if graph.add(child) {
                        organization_ids.push(id.clone());
                        frontier.push_back(id);
                    }
                }
            }
            children.includes.into_iter().for_each(|endpoint| {
                graph.add(endpoint);
            });
        }

        let owners = organization_ids
            .iter()
            .map(|id| format!("Organization/{id}"))
            .collect::<Vec<_>>()
            .join(",");

        let locations = self
            .store
            .search(ResourceKind::Location, &[("organization", owners.clone())])
            .await?;
        let roles = self
            .store
            .search(
                ResourceKind::PractitionerRole,
                &[
                    ("organization", owners.clone()),
                    ("_include", "PractitionerRole:practitioner".to_string()),
                ],
            )
            .await?;
        let services = self
            .store
            .search(ResourceKind::HealthcareService, &[("organization", owners)])
            .await?;

        for resource in locations
            .into_resources()
            .into_iter()
            .chain(roles.into_resources())
        {
            graph.add(resource);
        }

        let mut service_endpoints = Vec::new();
        for service in services.into_resources() {
            service_endpoints.extend(
                service
                    .all_references()
                    .into_iter()
                    .filter(|target| target.kind == ResourceKind::Endpoint),
            );
            graph.add(service);
        }

        for endpoint in service_endpoints {
            if graph.contains(&endpoint) {
                continue;
            }
            match self.store.read(endpoint.kind, &endpoint.id).await {
                Ok(resource) => {
                    graph.add(resource);
                }
                Err(e) if e.is_missing() => {
                    tracing::warn!(
                        endpoint = %endpoint,
                        base_url = %self.store.base_url(),
                        "HealthcareService references a missing Endpoint"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        tracing::debug!(
            base_url = %self.store.base_url(),
            organizations = organization_ids.len(),
            resources = graph.len(),
            "Organization graph collected"
        );

        Ok(graph)
    }
}
