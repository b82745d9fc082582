//! FHIR Bundle wire models
//!
//! Only the Bundle envelope is typed. Entry resources stay JSON and are turned
//! into [`Resource`] values when a search or history page is interpreted.

use crate::domain::{ChangeMethod, Resource, ResourceRef};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A FHIR Bundle (searchset, history, transaction or transaction-response)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    pub resource_type: String,

    #[serde(rename = "type")]
    pub bundle_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub link: Vec<BundleLink>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entry: Vec<BundleEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleLink {
    pub relation: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<BundleSearch>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<BundleRequest>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<BundleResponse>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleSearch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleRequest {
    pub method: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleResponse {
    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl Bundle {
    /// An empty bundle of the given type
    pub fn new(bundle_type: &str) -> Self {
        Self {
            resource_type: "Bundle".to_string(),
            bundle_type: bundle_type.to_string(),
            total: None,
            link: Vec::new(),
            entry: Vec::new(),
        }
    }

    /// An empty `transaction` bundle
    pub fn transaction() -> Self {
        Self::new("transaction")
    }

    /// URL of the `next` page, if any
    pub fn next_link(&self) -> Option<&str> {
        self.link
            .iter()
            .find(|link| link.relation == "next")
            .map(|link| link.url.as_str())
    }

    /// Parses a bundle from a JSON body, checking its `resourceType`
    pub fn from_json(value: Value) -> Result<Self, serde_json::Error> {
        let bundle: Bundle = serde_json::from_value(value)?;
        if bundle.resource_type != "Bundle" {
            return Err(serde::de::Error::custom(format!(
                "expected a Bundle, got {}",
                bundle.resource_type
            )));
        }
        Ok(bundle)
    }
}

/// Resources found by a search, split by search mode
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResult {
    /// Resources matching the search criteria
    pub matches: Vec<Resource>,
    /// Resources pulled in by `_include`
    pub includes: Vec<Resource>,
}

impl SearchResult {
    /// Adds the resources of one searchset page.
    ///
    /// OperationOutcome entries and resources of unsupported kinds are skipped.
    pub fn extend_from_page(&mut self, page: &Bundle) {
        for entry in &page.entry {
            let Some(value) = entry.resource.clone() else {
                continue;
            };
            if value.get("resourceType").and_then(Value::as_str) == Some("OperationOutcome") {
                continue;
            }
            let resource = match Resource::from_json(value) {
                Ok(resource) => resource,
                Err(e) => {
                    tracing::debug!(error = %e, "Skipping unsupported search entry");
                    continue;
                }
            };
            let mode = entry.search.as_ref().and_then(|s| s.mode.as_deref());
            match mode {
                Some("include") => self.includes.push(resource),
                Some("outcome") => {}
                _ => self.matches.push(resource),
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty() && self.includes.is_empty()
    }

    /// Matches followed by includes
    pub fn into_resources(self) -> Vec<Resource> {
        let mut resources = self.matches;
        resources.extend(self.includes);
        resources
    }
}

/// One entry of a `_history` bundle
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub full_url: Option<String>,
    pub method: ChangeMethod,
    pub url: String,
    /// Absent for deletes
    pub resource: Option<Resource>,
}

impl HistoryEntry {
    /// Interprets a history bundle entry.
    ///
    /// Entries without a usable request method are skipped.
    pub fn from_entry(entry: &BundleEntry) -> Option<Self> {
        let request = entry.request.as_ref()?;
        let method = ChangeMethod::from_http(&request.method)?;
        let resource = entry
            .resource
            .clone()
            .and_then(|value| Resource::from_json(value).ok());
        Some(Self {
            full_url: entry.full_url.clone(),
            method,
            url: request.url.clone(),
            resource,
        })
    }

    /// The resource this entry is about
    ///
    /// Taken from the resource itself, else from `fullUrl`, else from the
    /// request URL.
    pub fn target(&self) -> Option<ResourceRef> {
        self.resource
            .as_ref()
            .and_then(Resource::local_ref)
            .or_else(|| self.full_url.as_deref().and_then(ref_from_path))
            .or_else(|| ref_from_path(&self.url))
    }
}

/// Extracts `Kind/id` from an absolute or relative resource URL, ignoring any
/// query string and `_history/{version}` suffix.
pub(crate) fn ref_from_path(path: &str) -> Option<ResourceRef> {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if let Some(position) = segments.iter().position(|s| *s == "_history") {
        segments.truncate(position);
    }
    match segments.as_slice() {
        [.., kind, id] => ResourceRef::parse(&format!("{kind}/{id}")),
        _ => None,
    }
}
