//! In-memory [`FhirStore`]
//!
//! Supports the subset of FHIR search the crate issues (`_id`, `identifier`,
//! `partof`, `organization`, `_source`, `_include`), type and instance history
//! with `_since`, and atomic transactions with `urn:uuid` resolution. Used by
//! the test suites and for local experiments against fixture data.

use super::models::{Bundle, BundleEntry, BundleResponse, HistoryEntry, SearchResult};
use super::FhirStore;
use crate::domain::{
    AddressBookError, ChangeMethod, FhirError, Resource, ResourceKind, ResourceRef, Result,
};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone)]
struct Version {
    key: ResourceRef,
    method: ChangeMethod,
    resource: Option<Resource>,
    at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    live: BTreeMap<ResourceRef, Resource>,
    versions: HashMap<ResourceRef, u64>,
    deleted: HashSet<ResourceRef>,
    history: Vec<Version>,
    transactions: Vec<Bundle>,
    next_id: u64,
    unavailable: bool,
}

impl State {
    /// Server-assigned id, never reusing a live, deleted or reserved one
    fn next_id(&mut self, kind: ResourceKind, reserved: &HashSet<ResourceRef>) -> String {
        loop {
            self.next_id += 1;
            let candidate = self.next_id.to_string();
            let key = ResourceRef::new(kind, candidate.clone());
            if !self.live.contains_key(&key)
                && !self.deleted.contains(&key)
                && !reserved.contains(&key)
            {
                return candidate;
            }
        }
    }

    /// Stores a new version, stamping `meta.versionId` and `meta.lastUpdated`
    fn store(&mut self, key: ResourceRef, resource: Resource) -> Result<ChangeMethod> {
        let method = if self.live.contains_key(&key) {
            ChangeMethod::Update
        } else {
            ChangeMethod::Create
        };
        let version = self.versions.get(&key).copied().unwrap_or(0) + 1;
        let at = Utc::now();

        let mut body = match resource.into_json() {
            Value::Object(body) => body,
            _ => Map::new(),
        };
        body.insert("id".to_string(), Value::String(key.id.clone()));
        let meta = body
            .entry("meta".to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(meta) = meta {
            meta.insert("versionId".to_string(), Value::String(version.to_string()));
            meta.insert(
                "lastUpdated".to_string(),
                Value::String(at.to_rfc3339_opts(SecondsFormat::Millis, true)),
            );
        }
        let stored = Resource::from_json(Value::Object(body))?;

        self.versions.insert(key.clone(), version);
        self.deleted.remove(&key);
        self.live.insert(key.clone(), stored.clone());
        self.history.push(Version {
            key,
            method,
            resource: Some(stored),
            at,
        });
        Ok(method)
    }

    fn remove(&mut self, key: &ResourceRef) -> bool {
        if self.live.remove(key).is_none() {
            return false;
        }
        self.deleted.insert(key.clone());
        self.history.push(Version {
            key: key.clone(),
            method: ChangeMethod::Delete,
            resource: None,
            at: Utc::now(),
        });
        true
    }
}

/// FHIR server held in memory
pub struct InMemoryFhirStore {
    base_url: String,
    state: Mutex<State>,
}

impl InMemoryFhirStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_available(&self) -> Result<()> {
        if self.state().unavailable {
            return Err(FhirError::ConnectionFailed(format!("{} is unavailable", self.base_url)).into());
        }
        Ok(())
    }

    /// Creates or updates a resource, assigning an id when it has none
    pub fn put(&self, value: Value) -> Result<ResourceRef> {
        let resource = Resource::from_json(value)?;
        let mut state = self.state();
        let key = match resource.local_ref() {
            Some(key) => key,
            None => {
                let id = state.next_id(resource.kind(), &HashSet::new());
                ResourceRef::new(resource.kind(), id)
            }
        };
        state.store(key.clone(), resource)?;
        Ok(key)
    }

    /// Deletes a resource; returns whether it existed
    pub fn remove(&self, kind: ResourceKind, id: &str) -> bool {
        self.state().remove(&ResourceRef::new(kind, id))
    }

    /// Current version of a resource
    pub fn get(&self, key: &ResourceRef) -> Option<Resource> {
        self.state().live.get(key).cloned()
    }

    /// Every live resource of one kind
    pub fn resources(&self, kind: ResourceKind) -> Vec<Resource> {
        self.state()
            .live
            .iter()
            .filter(|(key, _)| key.kind == kind)
            .map(|(_, resource)| resource.clone())
            .collect()
    }

    /// Number of live resources
    pub fn len(&self) -> usize {
        self.state().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every transaction bundle received, in order
    pub fn transactions(&self) -> Vec<Bundle> {
        self.state().transactions.clone()
    }

    /// Makes every request fail with a connection error
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().unavailable = unavailable;
    }

    /// Literal references of live resources that point at no live resource
    pub fn dangling_references(&self) -> Vec<(ResourceRef, ResourceRef)> {
        let state = self.state();
        state
            .live
            .iter()
            .flat_map(|(key, resource)| {
                resource
                    .all_references()
                    .into_iter()
                    .filter(|target| !state.live.contains_key(target))
                    .map(move |target| (key.clone(), target))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    fn matches(resource: &Resource, name: &str, value: &str) -> Result<bool> {
        let matched = match name {
            "_id" => {
                let id = resource.id().unwrap_or_default();
                value.split(',').any(|candidate| candidate == id)
            }
            "identifier" => identifier_matches(resource, value),
            "partof" => {
                resource.kind() == ResourceKind::Organization
                    && reference_matches(resource.body().get("partOf"), value)
            }
            "organization" => {
                let field = match resource.kind() {
                    ResourceKind::Location | ResourceKind::Endpoint => "managingOrganization",
                    ResourceKind::HealthcareService => "providedBy",
                    ResourceKind::PractitionerRole => "organization",
                    _ => return Ok(false),
                };
                value
                    .split(',')
                    .any(|candidate| reference_matches(resource.body().get(field), candidate))
            }
            "_source" => resource.provenance() == Some(value),
            "_count" | "_include" => true,
            other => {
                return Err(FhirError::ClientError {
                    status: 400,
                    message: format!("Unsupported search parameter: {other}"),
                }
                .into());
            }
        };
        Ok(matched)
    }

    fn includes(
        state: &State,
        matches: &[Resource],
        include: &str,
    ) -> Result<Vec<Resource>> {
        let (kind, field) = include.split_once(':').ok_or_else(|| FhirError::ClientError {
            status: 400,
            message: format!("Invalid _include: {include}"),
        })?;
        let kind = ResourceKind::from_str(kind).map_err(|message| FhirError::ClientError {
            status: 400,
            message,
        })?;
        let field = kind
            .reference_fields()
            .iter()
            .find(|candidate| candidate.name() == field)
            .ok_or_else(|| FhirError::ClientError {
                status: 400,
                message: format!("Invalid _include: {include}"),
            })?;

        let mut seen = HashSet::new();
        let mut included = Vec::new();
        for resource in matches.iter().filter(|r| r.kind() == kind) {
            for target in resource.references(field) {
                if seen.insert(target.clone()) {
                    if let Some(found) = state.live.get(&target) {
                        included.push(found.clone());
                    }
                }
            }
        }
        Ok(included)
    }
}

fn identifier_matches(resource: &Resource, token: &str) -> bool {
    let (system, value) = match token.split_once('|') {
        Some((system, value)) => (Some(system), value),
        None => (None, token),
    };
    resource
        .body()
        .get("identifier")
        .and_then(Value::as_array)
        .is_some_and(|identifiers| {
            identifiers.iter().any(|identifier| {
                let system_ok = system.map_or(true, |system| {
                    identifier.get("system").and_then(Value::as_str) == Some(system)
                });
                let value_ok = value.is_empty()
                    || identifier.get("value").and_then(Value::as_str) == Some(value);
                system_ok && value_ok
            })
        })
}

fn reference_matches(element: Option<&Value>, wanted: &str) -> bool {
    let Some(reference) = element
        .and_then(|e| e.get("reference"))
        .and_then(Value::as_str)
    else {
        return false;
    };
    if reference == wanted {
        return true;
    }
    match (ResourceRef::parse(reference), ResourceRef::parse(wanted)) {
        (Some(a), Some(b)) => a == b,
        (Some(a), None) => a.id == wanted,
        _ => false,
    }
}

fn client_error(message: impl Into<String>) -> AddressBookError {
    FhirError::ClientError {
        status: 400,
        message: message.into(),
    }
    .into()
}

/// Replaces `urn:uuid` references anywhere in a JSON tree
fn resolve_placeholders(value: &mut Value, placeholders: &HashMap<String, ResourceRef>) -> Result<()> {
    match value {
        Value::Object(object) => {
            if let Some(Value::String(reference)) = object.get_mut("reference") {
                if reference.starts_with("urn:uuid:") {
                    let target = placeholders
                        .get(reference.as_str())
                        .ok_or_else(|| client_error(format!("Unresolved reference {reference}")))?;
                    *reference = target.to_reference();
                }
            }
            for child in object.values_mut() {
                resolve_placeholders(child, placeholders)?;
            }
        }
        Value::Array(items) => {
            for item in items {
                resolve_placeholders(item, placeholders)?;
            }
        }
        _ => {}
    }
    Ok(())
}

enum Operation {
    Store(ResourceRef, Resource),
    Delete(ResourceRef),
}

#[async_trait]
impl FhirStore for InMemoryFhirStore {
    async fn read(&self, kind: ResourceKind, id: &str) -> Result<Resource> {
        self.check_available()?;
        let key = ResourceRef::new(kind, id);
        let state = self.state();
        if let Some(resource) = state.live.get(&key) {
            return Ok(resource.clone());
        }
        if state.deleted.contains(&key) {
            return Err(FhirError::Gone(key.to_string()).into());
        }
        Err(FhirError::NotFound(key.to_string()).into())
    }

    async fn search(&self, kind: ResourceKind, params: &[(&str, String)]) -> Result<SearchResult> {
        self.check_available()?;
        let state = self.state();

        let mut matches = Vec::new();
        for resource in state.live.values().filter(|r| r.kind() == kind) {
            let mut matched = true;
            for (name, value) in params {
                if !Self::matches(resource, name, value)? {
                    matched = false;
                    break;
                }
            }
            if matched {
                matches.push(resource.clone());
            }
        }

        let mut includes = Vec::new();
        for (_, include) in params.iter().filter(|(name, _)| *name == "_include") {
            for resource in Self::includes(&state, &matches, include)? {
                let already = matches.iter().chain(includes.iter()).any(|existing: &Resource| {
                    existing.local_ref() == resource.local_ref()
                });
                if !already {
                    includes.push(resource);
                }
            }
        }

        Ok(SearchResult { matches, includes })
    }

    async fn history(
        &self,
        kind: ResourceKind,
        id: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<HistoryEntry>> {
        self.check_available()?;
        let state = self.state();
        let entries = state
            .history
            .iter()
            .rev()
            .filter(|version| version.key.kind == kind)
            .filter(|version| id.map_or(true, |id| version.key.id == id))
            .filter(|version| since.map_or(true, |since| version.at >= since))
            .map(|version| HistoryEntry {
                full_url: Some(format!("{}/{}", self.base_url, version.key)),
                method: version.method,
                url: match version.method {
                    ChangeMethod::Create => kind.to_string(),
                    _ => version.key.to_string(),
                },
                resource: version.resource.clone(),
            })
            .collect();
        Ok(entries)
    }

    async fn transaction(&self, bundle: &Bundle) -> Result<Bundle> {
        self.check_available()?;
        if bundle.bundle_type != "transaction" {
            return Err(client_error(format!(
                "Expected a transaction bundle, got {}",
                bundle.bundle_type
            )));
        }

        let mut state = self.state();

        // Assign ids to creates first so that placeholders resolve in any order
        let mut placeholders = HashMap::new();
        let mut reserved = HashSet::new();
        let mut planned = Vec::new();
        for entry in &bundle.entry {
            let request = entry
                .request
                .as_ref()
                .ok_or_else(|| client_error("Transaction entry without request"))?;
            match request.method.as_str() {
                "POST" => {
                    let kind = ResourceKind::from_str(&request.url).map_err(client_error)?;
                    let key = ResourceRef::new(kind, state.next_id(kind, &reserved));
                    reserved.insert(key.clone());
                    if let Some(full_url) = &entry.full_url {
                        placeholders.insert(full_url.clone(), key.clone());
                    }
                    planned.push((entry, Some(key)));
                }
                "PUT" | "DELETE" => planned.push((entry, None)),
                other => return Err(client_error(format!("Unsupported method {other}"))),
            }
        }

        let mut operations = Vec::new();
        for (entry, created) in planned {
            let request = entry
                .request
                .as_ref()
                .ok_or_else(|| client_error("Transaction entry without request"))?;
            let key = match created {
                Some(key) => key,
                None => ResourceRef::parse(&request.url)
                    .ok_or_else(|| client_error(format!("Invalid request url {}", request.url)))?,
            };

            if request.method == "DELETE" {
                operations.push(Operation::Delete(key));
                continue;
            }

            let mut body = entry
                .resource
                .clone()
                .ok_or_else(|| client_error(format!("{} without resource", request.method)))?;
            resolve_placeholders(&mut body, &placeholders)?;
            let resource = Resource::from_json(body).map_err(|e| client_error(e.to_string()))?;
            if resource.kind() != key.kind {
                return Err(client_error(format!(
                    "Resource type {} does not match {}",
                    resource.kind(),
                    request.url
                )));
            }
            if request.method == "PUT" && !state.live.contains_key(&key) {
                return Err(FhirError::NotFound(key.to_string()).into());
            }
            operations.push(Operation::Store(key, resource));
        }

        let mut response = Bundle::new("transaction-response");
        for operation in operations {
            let (key, status) = match operation {
                Operation::Store(key, resource) => {
                    let status = match state.store(key.clone(), resource)? {
                        ChangeMethod::Create => "201 Created",
                        _ => "200 OK",
                    };
                    (key, status)
                }
                Operation::Delete(key) => {
                    state.remove(&key);
                    (key, "204 No Content")
                }
            };
            response.entry.push(BundleEntry {
                response: Some(BundleResponse {
                    status: status.to_string(),
                    location: Some(key.to_reference()),
                }),
                ..Default::default()
            });
        }

        state.transactions.push(bundle.clone());
        Ok(response)
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }
}
