//! Authority resolution
//!
//! Decides which candidate changes from one source may be applied to the
//! aggregate. A change is authoritative when:
//!
//! 1. its provenance is already tracked in the aggregate,
//! 2. it is a root Organization whose URA the registry designates to this source,
//! 3. its owner is another accepted, non-delete change in the same batch, or
//! 4. its owner already lives in the aggregate and is not deleted by the batch.
//!
//! Rules 3 and 4 are applied as a worklist until nothing changes. Accepted
//! changes come out owners first.

use super::context::ReconciliationContext;
use crate::domain::{Change, ResourceKind, ResourceRef, Result};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

/// Why a change was not applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectionReason {
    /// Delete of a resource the aggregate never held
    UntrackedDelete,
    /// Root Organization without a URA identifier
    MissingUra,
    /// Root Organization whose URA the registry designates to another source
    NotDesignated,
    /// No literal owner reference and not a root Organization
    NoOwner,
    /// Owner is neither accepted in the batch nor present in the aggregate
    OwnerNotAuthoritative,
    /// Owner chain loops back on itself
    CyclicOwnership,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::UntrackedDelete => "untracked_delete",
            RejectionReason::MissingUra => "missing_ura",
            RejectionReason::NotDesignated => "not_designated",
            RejectionReason::NoOwner => "no_owner",
            RejectionReason::OwnerNotAuthoritative => "owner_not_authoritative",
            RejectionReason::CyclicOwnership => "cyclic_ownership",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Rejection {
    pub change: Change,
    pub reason: RejectionReason,
}

/// Accepted changes in apply order, plus everything that was turned away
#[derive(Debug, Default)]
pub struct AuthorityOutcome {
    pub accepted: Vec<Change>,
    pub rejected: Vec<Rejection>,
}

impl AuthorityOutcome {
    fn accept(&mut self, change: Change) {
        self.accepted.push(change);
    }

    fn reject(&mut self, change: Change, reason: RejectionReason) {
        self.rejected.push(Rejection { change, reason });
    }
}

/// Keeps only the last change per key, at the position of that last change
pub fn supersede(changes: Vec<Change>) -> Vec<Change> {
    let last: HashMap<ResourceRef, usize> = changes
        .iter()
        .enumerate()
        .map(|(index, change)| (change.key.clone(), index))
        .collect();
    changes
        .into_iter()
        .enumerate()
        .filter(|(index, change)| last.get(&change.key) == Some(index))
        .map(|(_, change)| change)
        .collect()
}

/// A change waiting for its owner to become authoritative
struct Pending {
    change: Option<Change>,
    owner: ResourceRef,
}

/// Splits a batch into authoritative and rejected changes
pub async fn resolve_authority(
    changes: Vec<Change>,
    context: &mut ReconciliationContext,
) -> Result<AuthorityOutcome> {
    let mut outcome = AuthorityOutcome::default();
    let mut pending: Vec<Pending> = Vec::new();

    for change in supersede(changes) {
        if context.aggregate_id(&change.key).await?.is_some() {
            outcome.accept(change);
            continue;
        }
        if change.is_delete() {
            outcome.reject(change, RejectionReason::UntrackedDelete);
            continue;
        }
        let Some(resource) = change.resource.as_ref() else {
            outcome.reject(change, RejectionReason::NoOwner);
            continue;
        };

        if resource.kind() == ResourceKind::Organization && !resource.has_owner_element() {
            match resource.ura() {
                None => outcome.reject(change, RejectionReason::MissingUra),
                Some(ura) if context.is_designated(&ura).await? => outcome.accept(change),
                Some(_) => outcome.reject(change, RejectionReason::NotDesignated),
            }
            continue;
        }

        match resource
            .owner()
            .filter(|owner| owner.kind == ResourceKind::Organization)
        {
            Some(owner) => pending.push(Pending {
                change: Some(change),
                owner,
            }),
            None => outcome.reject(change, RejectionReason::NoOwner),
        }
    }

    let deleted: HashSet<ResourceRef> = outcome
        .accepted
        .iter()
        .filter(|change| change.is_delete())
        .map(|change| change.key.clone())
        .collect();

    let mut waiting: HashMap<ResourceRef, Vec<usize>> = HashMap::new();
    for (index, entry) in pending.iter().enumerate() {
        waiting.entry(entry.owner.clone()).or_default().push(index);
    }

    let mut worklist: VecDeque<ResourceRef> = outcome
        .accepted
        .iter()
        .filter(|change| !change.is_delete())
        .map(|change| change.key.clone())
        .collect();
    let mut visited: HashSet<ResourceRef> = HashSet::new();

    loop {
        while let Some(owner) = worklist.pop_front() {
            if !visited.insert(owner.clone()) {
                continue;
            }
            for index in waiting.remove(&owner).unwrap_or_default() {
                if let Some(change) = pending[index].change.take() {
                    worklist.push_back(change.key.clone());
                    outcome.accept(change);
                }
            }
        }

        let mut progressed = false;
        for entry in pending.iter_mut().filter(|entry| entry.change.is_some()) {
            if deleted.contains(&entry.owner) {
                continue;
            }
            if context.aggregate_id(&entry.owner).await?.is_none() {
                continue;
            }
            if let Some(change) = entry.change.take() {
                worklist.push_back(change.key.clone());
                outcome.accept(change);
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }

    let unresolved: HashMap<ResourceRef, ResourceRef> = pending
        .iter()
        .filter_map(|entry| {
            entry
                .change
                .as_ref()
                .map(|change| (change.key.clone(), entry.owner.clone()))
        })
        .collect();
    for entry in pending.iter_mut() {
        let Some(change) = entry.change.take() else {
            continue;
        };
        let reason = if owner_chain_loops(&change.key, &unresolved) {
            RejectionReason::CyclicOwnership
        } else {
            RejectionReason::OwnerNotAuthoritative
        };
        outcome.reject(change, reason);
    }

    apply_registry_names(&mut outcome, context).await?;

    tracing::debug!(
        source = %context.source(),
        accepted = outcome.accepted.len(),
        rejected = outcome.rejected.len(),
        "Authority resolved"
    );
    Ok(outcome)
}

/// Follows owners through the unresolved set; true when a key repeats
fn owner_chain_loops(start: &ResourceRef, unresolved: &HashMap<ResourceRef, ResourceRef>) -> bool {
    let mut seen = HashSet::from([start]);
    let mut current = start;
    while let Some(owner) = unresolved.get(current) {
        if !seen.insert(owner) {
            return true;
        }
        current = owner;
    }
    false
}

/// The registry's name wins over the source's for organizations with a URA
async fn apply_registry_names(
    outcome: &mut AuthorityOutcome,
    context: &mut ReconciliationContext,
) -> Result<()> {
    for change in outcome.accepted.iter_mut() {
        let Some(resource) = change.resource.as_mut() else {
            continue;
        };
        if resource.kind() != ResourceKind::Organization {
            continue;
        }
        let Some(ura) = resource.ura() else {
            continue;
        };
        if let Some(name) = context.authority(&ura).await?.and_then(|a| a.name) {
            resource.set_name(&name);
        }
    }
    Ok(())
}
