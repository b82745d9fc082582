//! Reference rewriting
//!
//! Source-local ids mean nothing in the aggregate. The rewriter first decides
//! where every change lands (an existing aggregate id, or a `urn:uuid`
//! placeholder for records the transaction will create) and only then points
//! each reference at the new location.

use super::context::ReconciliationContext;
use crate::domain::{Change, Provenance, Resource, ResourceRef, Result};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Where a change lands in the aggregate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteTarget {
    /// New record, addressed by its placeholder until the transaction commits
    Create { full_url: String },
    /// Existing record, replaced in place
    Update { id: String },
    /// Existing record, removed
    Delete { id: String },
}

/// A change expressed in aggregate terms
#[derive(Debug, Clone)]
pub struct RewrittenChange {
    pub key: ResourceRef,
    pub provenance: Provenance,
    pub target: WriteTarget,
    pub resource: Option<Resource>,
}

impl RewrittenChange {
    /// The aggregate `Kind/id` this change writes, unless it creates a record
    pub fn aggregate_ref(&self) -> Option<ResourceRef> {
        match &self.target {
            WriteTarget::Create { .. } => None,
            WriteTarget::Update { id } | WriteTarget::Delete { id } => {
                Some(ResourceRef::new(self.key.kind, id.clone()))
            }
        }
    }
}

/// Rewrites accepted changes against the aggregate
///
/// Deletes of records the aggregate does not hold are dropped.
pub async fn rewrite(
    changes: Vec<Change>,
    context: &mut ReconciliationContext,
) -> Result<Vec<RewrittenChange>> {
    let mut declared: HashMap<ResourceRef, String> = HashMap::new();
    let deleted: HashSet<ResourceRef> = changes
        .iter()
        .filter(|c| c.is_delete())
        .map(|c| c.key.clone())
        .collect();

    let mut planned = Vec::with_capacity(changes.len());
    for change in changes {
        let aggregate_id = context.aggregate_id(&change.key).await?;
        let target = match (change.is_delete(), aggregate_id) {
            (true, Some(id)) => WriteTarget::Delete { id },
            (true, None) => {
                tracing::debug!(source = %context.source(), key = %change.key, "Delete of untracked record dropped");
                continue;
            }
            (false, Some(id)) => WriteTarget::Update { id },
            (false, None) => {
                let full_url = format!("urn:uuid:{}", Uuid::new_v4());
                declared.insert(change.key.clone(), full_url.clone());
                WriteTarget::Create { full_url }
            }
        };
        planned.push((change, target));
    }

    let mut rewritten = Vec::with_capacity(planned.len());
    for (change, target) in planned {
        let provenance = context.provenance(&change.key);
        let resource = match change.resource {
            Some(mut resource) => {
                let mut resolved: HashMap<ResourceRef, Option<String>> = HashMap::new();
                for reference in resource.all_references() {
                    if resolved.contains_key(&reference) {
                        continue;
                    }
                    let location = if deleted.contains(&reference) {
                        None
                    } else if let Some(id) = context.aggregate_id(&reference).await? {
                        Some(ResourceRef::new(reference.kind, id).to_reference())
                    } else {
                        declared.get(&reference).cloned()
                    };
                    if location.is_none() {
                        tracing::debug!(
                            source = %context.source(),
                            key = %change.key,
                            reference = %reference,
                            "Dropping unresolvable reference"
                        );
                    }
                    resolved.insert(reference, location);
                }
                resource.rewrite_references(|reference| resolved.get(reference).cloned().flatten());
                resource.strip_server_metadata();
                Some(resource)
            }
            None => None,
        };

        rewritten.push(RewrittenChange {
            key: change.key,
            provenance,
            target,
            resource,
        });
    }

    Ok(rewritten)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::fhir::InMemoryFhirStore;
    use crate::adapters::{Lrza, QueryDirectory};
    use crate::domain::{ChangeMethod, ResourceKind, SourceUrl};
    use serde_json::{json, Value};
    use std::sync::Arc;

    const SOURCE: &str = "https://ad.example.org/fhir";

    fn change(value: Value) -> Change {
        Change::upsert(ChangeMethod::Update, Resource::from_json(value).unwrap()).unwrap()
    }

    fn context(aggregate: Arc<InMemoryFhirStore>) -> ReconciliationContext {
        ReconciliationContext::new(
            SourceUrl::new(SOURCE).unwrap(),
            QueryDirectory::new(aggregate),
            Arc::new(Lrza::new(Arc::new(InMemoryFhirStore::new(
                "http://lrza.example.org/fhir",
            )))),
        )
    }

    #[tokio::test]
    async fn test_forward_declarations_and_mapped_references() {
        let aggregate = Arc::new(InMemoryFhirStore::new("http://qd.example.org/fhir"));
        aggregate
            .put(json!({
                "resourceType": "Organization",
                "id": "700",
                "meta": {"source": format!("{SOURCE}/Organization/o1")}
            }))
            .unwrap();
        let mut context = context(aggregate);

        let changes = vec![
            change(json!({
                "resourceType": "Organization",
                "id": "o1",
                "meta": {"versionId": "3", "lastUpdated": "2025-01-01T00:00:00Z"},
                "endpoint": [{"reference": "Endpoint/e1"}]
            })),
            change(json!({"resourceType": "Endpoint", "id": "e1"})),
            change(json!({
                "resourceType": "Location",
                "id": "l1",
                "managingOrganization": {"reference": "Organization/o1"},
                "partOf": {"reference": "Location/unknown", "display": "Hoofdgebouw"},
                "endpoint": [{"reference": "https://elsewhere.example.org/Endpoint/x"}]
            })),
        ];

        let rewritten = rewrite(changes, &mut context).await.unwrap();
        assert_eq!(rewritten.len(), 3);

        assert_eq!(rewritten[0].target, WriteTarget::Update { id: "700".to_string() });
        let WriteTarget::Create { full_url } = &rewritten[1].target else {
            panic!("endpoint should be created");
        };
        assert!(full_url.starts_with("urn:uuid:"));

        let organization = rewritten[0].resource.as_ref().unwrap().body();
        assert_eq!(organization["endpoint"], json!([{"reference": full_url}]));
        assert!(organization.get("id").is_none());
        assert!(organization.get("meta").map_or(true, |m| m.get("versionId").is_none()));

        let location = rewritten[2].resource.as_ref().unwrap().body();
        assert_eq!(location["managingOrganization"], json!({"reference": "Organization/700"}));
        assert_eq!(location["partOf"], json!({"display": "Hoofdgebouw"}));
        assert!(!location.contains_key("endpoint"));
        assert_eq!(
            rewritten[2].provenance.to_string(),
            format!("{SOURCE}/Location/l1")
        );
    }

    #[tokio::test]
    async fn test_deletes_target_aggregate_ids() {
        let aggregate = Arc::new(InMemoryFhirStore::new("http://qd.example.org/fhir"));
        aggregate
            .put(json!({
                "resourceType": "Endpoint",
                "id": "800",
                "meta": {"source": format!("{SOURCE}/Endpoint/e1")}
            }))
            .unwrap();
        let mut context = context(aggregate);

        let changes = vec![
            Change::delete(ResourceRef::new(ResourceKind::Endpoint, "e1")),
            Change::delete(ResourceRef::new(ResourceKind::Endpoint, "untracked")),
            change(json!({
                "resourceType": "HealthcareService",
                "id": "hs1",
                "endpoint": [{"reference": "Endpoint/e1"}]
            })),
        ];

        let rewritten = rewrite(changes, &mut context).await.unwrap();
        assert_eq!(rewritten.len(), 2);
        assert_eq!(rewritten[0].target, WriteTarget::Delete { id: "800".to_string() });
        assert!(rewritten[0].resource.is_none());
        assert_eq!(
            rewritten[0].aggregate_ref(),
            Some(ResourceRef::new(ResourceKind::Endpoint, "800"))
        );
        assert!(!rewritten[1]
            .resource
            .as_ref()
            .unwrap()
            .body()
            .contains_key("endpoint"));
    }
}
