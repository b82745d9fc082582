//! Candidate changes pulled from an Admin Directory

use super::ids::SourceUrl;
use super::resource::{Resource, ResourceRef};
use std::fmt;

/// What a source did to a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeMethod {
    /// Resource created at the source (history `POST`)
    Create,
    /// Resource updated at the source, or seen in a snapshot (history `PUT`)
    Update,
    /// Resource deleted at the source (history `DELETE`)
    Delete,
}

impl ChangeMethod {
    /// Maps a FHIR history/bundle request method.
    pub fn from_http(method: &str) -> Option<Self> {
        match method.to_ascii_uppercase().as_str() {
            "POST" => Some(ChangeMethod::Create),
            "PUT" | "PATCH" => Some(ChangeMethod::Update),
            "DELETE" => Some(ChangeMethod::Delete),
            _ => None,
        }
    }
}

/// One candidate change for one source resource
///
/// `key` is the source-local `Kind/id`; `resource` is absent for deletes.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub method: ChangeMethod,
    pub key: ResourceRef,
    pub resource: Option<Resource>,
}

impl Change {
    /// A change carrying the current state of a resource.
    ///
    /// Returns `None` when the resource has no id.
    pub fn upsert(method: ChangeMethod, resource: Resource) -> Option<Self> {
        let key = resource.local_ref()?;
        Some(Self {
            method,
            key,
            resource: Some(resource),
        })
    }

    /// A snapshot of a resource as found in an organization graph
    pub fn snapshot(resource: Resource) -> Option<Self> {
        Self::upsert(ChangeMethod::Update, resource)
    }

    pub fn delete(key: ResourceRef) -> Self {
        Self {
            method: ChangeMethod::Delete,
            key,
            resource: None,
        }
    }

    pub fn is_delete(&self) -> bool {
        self.method == ChangeMethod::Delete
    }
}

/// Provenance of an aggregate record: `{source}/{Kind}/{id}`
///
/// Stored in `meta.source` of every record written to the Query Directory and
/// searched with `_source` to find the record again.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Provenance {
    pub source: SourceUrl,
    pub key: ResourceRef,
}

impl Provenance {
    pub fn new(source: &SourceUrl, key: &ResourceRef) -> Self {
        Self {
            source: source.clone(),
            key: key.clone(),
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.source, self.key.kind, self.key.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::resource::ResourceKind;
    use serde_json::json;

    #[test]
    fn test_method_from_http() {
        assert_eq!(ChangeMethod::from_http("POST"), Some(ChangeMethod::Create));
        assert_eq!(ChangeMethod::from_http("put"), Some(ChangeMethod::Update));
        assert_eq!(ChangeMethod::from_http("DELETE"), Some(ChangeMethod::Delete));
        assert_eq!(ChangeMethod::from_http("GET"), None);
    }

    #[test]
    fn test_snapshot_requires_id() {
        let without_id =
            Resource::from_json(json!({"resourceType": "Organization", "name": "x"})).unwrap();
        assert!(Change::snapshot(without_id).is_none());

        let with_id = Resource::from_json(json!({"resourceType": "Organization", "id": "o1"})).unwrap();
        let change = Change::snapshot(with_id).unwrap();
        assert_eq!(change.key, ResourceRef::new(ResourceKind::Organization, "o1"));
        assert!(!change.is_delete());
    }

    #[test]
    fn test_provenance_display() {
        let source = SourceUrl::new("https://ad.example.org/fhir/").unwrap();
        let key = ResourceRef::new(ResourceKind::Location, "l1");
        assert_eq!(
            Provenance::new(&source, &key).to_string(),
            "https://ad.example.org/fhir/Location/l1"
        );
    }
}
