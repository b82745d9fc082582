//! Additional-resource fetching
//!
//! Endpoints and Practitioners have no owner, so they never become
//! authoritative on their own. They ride along with the accepted resources
//! that reference them: a rejected change for the target in the same batch is
//! promoted, otherwise the target is read from the source.

use super::authority::{AuthorityOutcome, RejectionReason};
use super::context::ReconciliationContext;
use crate::adapters::AdminDirectory;
use crate::domain::{Change, ChangeMethod, ResourceKind, ResourceRef, Result};
use std::collections::HashSet;

/// Reference elements whose targets are read from the source when missing
const FETCHED_REFERENCES: &[(ResourceKind, &str)] = &[
    (ResourceKind::Organization, "endpoint"),
    (ResourceKind::HealthcareService, "endpoint"),
    (ResourceKind::PractitionerRole, "practitioner"),
];

fn is_fetched(kind: ResourceKind, field: &str) -> bool {
    FETCHED_REFERENCES
        .iter()
        .any(|(k, f)| *k == kind && *f == field)
}

/// Counts of resources pulled in next to the accepted changes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchSummary {
    pub promoted: usize,
    pub fetched: usize,
}

/// Completes the accepted set with the resources it references
///
/// Newly added changes are inspected in turn. Targets deleted by the batch are
/// left alone, and a target the source no longer has is skipped with a warning.
pub async fn fetch_additional(
    outcome: &mut AuthorityOutcome,
    source: &AdminDirectory,
    context: &mut ReconciliationContext,
) -> Result<FetchSummary> {
    let mut summary = FetchSummary::default();
    let mut settled: HashSet<ResourceRef> =
        outcome.accepted.iter().map(|c| c.key.clone()).collect();
    let deleted: HashSet<ResourceRef> = outcome
        .accepted
        .iter()
        .chain(outcome.rejected.iter().map(|r| &r.change))
        .filter(|c| c.is_delete())
        .map(|c| c.key.clone())
        .collect();

    let mut next = 0;
    while next < outcome.accepted.len() {
        let Some(resource) = outcome.accepted[next].resource.as_ref() else {
            next += 1;
            continue;
        };
        next += 1;

        let kind = resource.kind();
        let targets: Vec<(ResourceRef, bool)> = kind
            .reference_fields()
            .iter()
            .flat_map(|field| {
                let fetch = is_fetched(kind, &field.name());
                resource
                    .references(field)
                    .into_iter()
                    .map(move |target| (target, fetch))
            })
            .collect();

        for (target, fetch) in targets {
            if settled.contains(&target) || deleted.contains(&target) {
                continue;
            }

            let promotable = outcome.rejected.iter().position(|r| {
                r.change.key == target && r.reason == RejectionReason::NoOwner
            });
            if let Some(index) = promotable {
                let rejection = outcome.rejected.remove(index);
                tracing::debug!(source = %source.source(), resource = %target, "Promoted referenced resource");
                settled.insert(target);
                outcome.accepted.push(rejection.change);
                summary.promoted += 1;
                continue;
            }

            if !fetch || context.aggregate_id(&target).await?.is_some() {
                continue;
            }

            match source.read(&target).await {
                Ok(resource) => {
                    if let Some(change) = Change::upsert(ChangeMethod::Create, resource) {
                        tracing::debug!(source = %source.source(), resource = %target, "Fetched referenced resource");
                        settled.insert(target);
                        outcome.accepted.push(change);
                        summary.fetched += 1;
                    }
                }
                Err(e) if e.is_missing() => {
                    tracing::warn!(
                        source = %source.source(),
                        resource = %target,
                        "Referenced resource no longer exists at the source"
                    );
                    settled.insert(target);
                }
                Err(e) => return Err(e),
            }
        }
    }

    Ok(summary)
}
