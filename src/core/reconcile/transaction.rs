//! Transaction bundle assembly

use super::rewriter::{RewrittenChange, WriteTarget};
use crate::adapters::fhir::{Bundle, BundleEntry, BundleRequest};
use crate::domain::{Resource, ResourceKind, ResourceRef};
use std::collections::{BTreeSet, HashSet};

/// A write waiting for the bundle
#[derive(Debug)]
enum Write {
    Create {
        full_url: String,
        resource: Resource,
    },
    Update {
        target: ResourceRef,
        resource: Resource,
    },
}

/// Collects rewritten changes and deletions into one transaction Bundle
///
/// Deletes are collapsed per aggregate record, and an update of a record that
/// the same bundle deletes is left out. References to deleted records are
/// dropped from every written resource.
#[derive(Debug, Default)]
pub struct TransactionBuilder {
    writes: Vec<Write>,
    deletes: BTreeSet<ResourceRef>,
}

impl TransactionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one rewritten change, tagging written resources with their provenance
    pub fn add(&mut self, change: RewrittenChange) {
        let kind = change.key.kind;
        match (change.target, change.resource) {
            (WriteTarget::Delete { id }, _) => self.delete(ResourceRef::new(kind, id)),
            (WriteTarget::Create { full_url }, Some(mut resource)) => {
                resource.set_provenance(&change.provenance.to_string());
                self.writes.push(Write::Create { full_url, resource });
            }
            (WriteTarget::Update { id }, Some(mut resource)) => {
                resource.set_provenance(&change.provenance.to_string());
                resource.set_id(&id);
                self.writes.push(Write::Update {
                    target: ResourceRef::new(kind, id),
                    resource,
                });
            }
            (_, None) => {
                tracing::warn!(key = %change.key, "Write without resource body skipped");
            }
        }
    }

    /// Deletes one aggregate record
    pub fn delete(&mut self, target: ResourceRef) {
        self.deletes.insert(target);
    }

    pub fn is_deleted(&self, target: &ResourceRef) -> bool {
        self.deletes.contains(target)
    }

    fn kept_writes(&self) -> impl Iterator<Item = &Write> {
        self.writes.iter().filter(|write| match write {
            Write::Update { target, .. } => !self.deletes.contains(target),
            Write::Create { .. } => true,
        })
    }

    pub fn creates(&self) -> usize {
        self.writes
            .iter()
            .filter(|w| matches!(w, Write::Create { .. }))
            .count()
    }

    pub fn updates(&self) -> usize {
        self.kept_writes()
            .filter(|w| matches!(w, Write::Update { .. }))
            .count()
    }

    pub fn deletes(&self) -> usize {
        self.deletes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.deletes.is_empty()
    }

    /// Builds the transaction: creates and updates first, then deletes
    pub fn build(self) -> Bundle {
        let mut bundle = Bundle::transaction();
        let deleted: HashSet<ResourceRef> = self.deletes.iter().cloned().collect();

        for write in self.writes {
            let (full_url, method, url, mut resource) = match write {
                Write::Create { full_url, resource } => {
                    let url = resource.kind().to_string();
                    (Some(full_url), "POST", url, resource)
                }
                Write::Update { target, resource } => {
                    if deleted.contains(&target) {
                        tracing::debug!(target = %target, "Update dropped, record deleted in the same bundle");
                        continue;
                    }
                    (None, "PUT", target.to_reference(), resource)
                }
            };
            if !deleted.is_empty() {
                resource.drop_references(&deleted);
            }
            bundle.entry.push(BundleEntry {
                full_url,
                resource: Some(resource.into_json()),
                request: Some(BundleRequest {
                    method: method.to_string(),
                    url,
                }),
                ..Default::default()
            });
        }

        for target in self.deletes {
            bundle.entry.push(BundleEntry {
                request: Some(BundleRequest {
                    method: "DELETE".to_string(),
                    url: target.to_reference(),
                }),
                ..Default::default()
            });
        }

        bundle
    }
}

/// Number of entries per resource kind, for logging
pub fn entries_by_kind(bundle: &Bundle) -> Vec<(ResourceKind, usize)> {
    ResourceKind::ALL
        .iter()
        .map(|kind| {
            let count = bundle
                .entry
                .iter()
                .filter_map(|entry| entry.request.as_ref())
                .filter(|request| {
                    request.url == kind.as_str()
                        || request.url.starts_with(&format!("{}/", kind.as_str()))
                })
                .count();
            (*kind, count)
        })
        .filter(|(_, count)| *count > 0)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Provenance, SourceUrl};
    use serde_json::{json, Value};

    fn rewritten(kind: ResourceKind, key: &str, target: WriteTarget, body: Option<Value>) -> RewrittenChange {
        let key = ResourceRef::new(kind, key);
        RewrittenChange {
            provenance: Provenance::new(&SourceUrl::new("https://ad.example.org/fhir").unwrap(), &key),
            key,
            target,
            resource: body.map(|b| Resource::from_json(b).unwrap()),
        }
    }

    #[test]
    fn test_builds_entries_with_provenance() {
        let mut builder = TransactionBuilder::new();
        builder.add(rewritten(
            ResourceKind::Endpoint,
            "e1",
            WriteTarget::Create {
                full_url: "urn:uuid:1".to_string(),
            },
            Some(json!({"resourceType": "Endpoint"})),
        ));
        builder.add(rewritten(
            ResourceKind::Organization,
            "o1",
            WriteTarget::Update {
                id: "42".to_string(),
            },
            Some(json!({"resourceType": "Organization", "endpoint": [{"reference": "urn:uuid:1"}]})),
        ));
        builder.add(rewritten(
            ResourceKind::Location,
            "l1",
            WriteTarget::Delete {
                id: "7".to_string(),
            },
            None,
        ));
        assert_eq!((builder.creates(), builder.updates(), builder.deletes()), (1, 1, 1));

        let bundle = builder.build();
        assert_eq!(bundle.bundle_type, "transaction");
        assert_eq!(bundle.entry.len(), 3);

        let post = &bundle.entry[0];
        assert_eq!(post.full_url.as_deref(), Some("urn:uuid:1"));
        assert_eq!(post.request.as_ref().unwrap().url, "Endpoint");
        assert_eq!(
            post.resource.as_ref().unwrap()["meta"]["source"],
            json!("https://ad.example.org/fhir/Endpoint/e1")
        );

        let put = &bundle.entry[1];
        assert_eq!(put.request.as_ref().unwrap().method, "PUT");
        assert_eq!(put.request.as_ref().unwrap().url, "Organization/42");
        assert_eq!(put.resource.as_ref().unwrap()["id"], json!("42"));
        assert_eq!(
            put.resource.as_ref().unwrap()["endpoint"],
            json!([{"reference": "urn:uuid:1"}])
        );

        let delete = &bundle.entry[2];
        assert_eq!(delete.request.as_ref().unwrap().method, "DELETE");
        assert_eq!(delete.request.as_ref().unwrap().url, "Location/7");
        assert!(delete.resource.is_none());
    }

    #[test]
    fn test_collapses_deletes_and_drops_shadowed_updates() {
        let mut builder = TransactionBuilder::new();
        builder.add(rewritten(
            ResourceKind::Location,
            "l1",
            WriteTarget::Update {
                id: "7".to_string(),
            },
            Some(json!({"resourceType": "Location"})),
        ));
        builder.add(rewritten(
            ResourceKind::HealthcareService,
            "hs1",
            WriteTarget::Update {
                id: "8".to_string(),
            },
            Some(json!({
                "resourceType": "HealthcareService",
                "location": [{"reference": "Location/7"}, {"reference": "Location/9"}]
            })),
        ));
        builder.delete(ResourceRef::new(ResourceKind::Location, "7"));
        builder.delete(ResourceRef::new(ResourceKind::Location, "7"));

        assert_eq!((builder.creates(), builder.updates(), builder.deletes()), (0, 1, 1));
        let bundle = builder.build();
        assert_eq!(bundle.entry.len(), 2);
        assert_eq!(
            bundle.entry[0].resource.as_ref().unwrap()["location"],
            json!([{"reference": "Location/9"}])
        );
        assert_eq!(
            entries_by_kind(&bundle),
            vec![(ResourceKind::Location, 1), (ResourceKind::HealthcareService, 1)]
        );
    }

    #[test]
    fn test_empty_builder() {
        let builder = TransactionBuilder::new();
        assert!(builder.is_empty());
        assert!(builder.build().entry.is_empty());
    }
}
