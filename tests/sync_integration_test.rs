//! End-to-end sync runs against in-memory registry, Query Directory and
//! Admin Directories

mod common;

use addressbook_sync::core::state::SyncState;
use addressbook_sync::core::sync::{SyncErrorType, SyncMode};
use addressbook_sync::domain::{AddressBookError, ResourceKind, ResourceRef, SourceUrl, URA_SYSTEM};
use chrono::{Duration, Utc};
use common::*;
use serde_json::json;
use std::sync::Arc;

fn incremental() -> SyncMode {
    SyncMode::Incremental { since: None }
}

/// Registry designates A for 1111 and B for 2222, both fully synced
async fn synced_network() -> Network {
    let network = Network::new();
    network.register("1111", "Zorg Een", SOURCE_A);
    network.register("2222", "Zorg Twee", SOURCE_B);
    seed_organization(&network.source_a, "o1", "1111", "Lokale naam");
    seed_organization(&network.source_b, "o2", "2222", "Twee lokaal");

    let summary = network.coordinator().run(SyncMode::Full).await.unwrap();
    assert!(summary.is_successful(), "{:?}", summary.errors);
    network
}

#[tokio::test]
async fn test_full_sync_copies_graphs_with_rewritten_references() {
    let network = Network::new();
    network.register("1111", "Zorg Een", SOURCE_A);
    seed_organization(&network.source_a, "o1", "1111", "Lokale naam");

    let summary = network.coordinator().run(SyncMode::Full).await.unwrap();
    assert!(summary.is_successful());
    assert_eq!(summary.organizations, 1);
    assert_eq!(summary.records_created, 3);
    assert_eq!(network.aggregate.transactions().len(), 1);

    let organization = network
        .copy_of(SOURCE_A, ResourceKind::Organization, "o1")
        .unwrap();
    let endpoint = network
        .copy_of(SOURCE_A, ResourceKind::Endpoint, "o1-ep")
        .unwrap();
    let location = network
        .copy_of(SOURCE_A, ResourceKind::Location, "o1-loc")
        .unwrap();

    // registry name wins over the source's
    assert_eq!(organization.name(), Some("Zorg Een"));
    assert_eq!(
        organization.body()["endpoint"],
        json!([{"reference": endpoint.local_ref().unwrap().to_reference()}])
    );
    assert_eq!(
        location.body()["managingOrganization"],
        json!({"reference": organization.local_ref().unwrap().to_reference()})
    );
    assert!(network.aggregate.dangling_references().is_empty());

    let state = network.storage.snapshot();
    let source = SourceUrl::new(SOURCE_A).unwrap();
    assert!(state.registry_cursor().is_some());
    assert_eq!(state.sources, vec![source.clone()]);
    assert!(state.source_cursor(&source).is_some());
}

#[tokio::test]
async fn test_full_sync_is_idempotent() {
    let network = synced_network().await;
    let records = network.aggregate.len();

    let summary = network.coordinator().run(SyncMode::Full).await.unwrap();
    assert_eq!(summary.records_created, 0);
    assert_eq!(summary.records_updated, 6);
    assert_eq!(network.aggregate.len(), records);
    assert!(network.aggregate.dangling_references().is_empty());
}

#[tokio::test]
async fn test_full_sync_removes_organizations_that_left_the_registry() {
    let network = Network::new();
    network.register("1111", "Zorg Een", SOURCE_A);
    seed_organization(&network.source_a, "o1", "1111", "Lokale naam");
    network
        .aggregate
        .put(json!({
            "resourceType": "Organization",
            "id": "stale",
            "identifier": [{"system": URA_SYSTEM, "value": "7777"}],
            "meta": {"source": "https://gone.example.org/fhir/Organization/x"}
        }))
        .unwrap();

    let summary = network.coordinator().run(SyncMode::Full).await.unwrap();
    assert_eq!(summary.organizations_removed, 1);
    assert!(network
        .aggregate
        .get(&ResourceRef::new(
            ResourceKind::Organization,
            "stale"
        ))
        .is_none());
    assert!(network
        .copy_of(SOURCE_A, ResourceKind::Organization, "o1")
        .is_some());
}

#[tokio::test]
async fn test_incremental_applies_latest_version_only() {
    let network = synced_network().await;
    network
        .source_a
        .put(location("o1-loc", "o1", "T1"))
        .unwrap();
    network
        .source_a
        .put(location("o1-loc", "o1", "T2"))
        .unwrap();

    let summary = network.coordinator().run(incremental()).await.unwrap();
    assert!(summary.is_successful());
    assert_eq!(summary.records_created, 0);
    assert_eq!(summary.records_updated, 1);

    let location = network
        .copy_of(SOURCE_A, ResourceKind::Location, "o1-loc")
        .unwrap();
    assert_eq!(location.name(), Some("T2"));
    assert_eq!(
        network.aggregate.resources(ResourceKind::Location).len(),
        2
    );
}

#[tokio::test]
async fn test_untracked_delete_is_a_no_op() {
    let network = synced_network().await;
    let transactions = network.aggregate.transactions().len();

    network
        .source_a
        .put(location("pop-up", "o1", "Tijdelijk"))
        .unwrap();
    assert!(network.source_a.remove(ResourceKind::Location, "pop-up"));

    let summary = network.coordinator().run(incremental()).await.unwrap();
    assert!(summary.is_successful());
    assert_eq!(summary.changes_rejected, 1);
    assert_eq!(network.aggregate.transactions().len(), transactions);
}

#[tokio::test]
async fn test_organization_delete_cascades_to_its_graph() {
    let network = synced_network().await;
    assert!(network.source_a.remove(ResourceKind::Organization, "o1"));

    let summary = network.coordinator().run(incremental()).await.unwrap();
    assert!(summary.is_successful());
    assert_eq!(summary.records_deleted, 3);
    assert!(network
        .copy_of(SOURCE_A, ResourceKind::Location, "o1-loc")
        .is_none());
    assert!(network
        .copy_of(SOURCE_B, ResourceKind::Organization, "o2")
        .is_some());
    assert!(network.aggregate.dangling_references().is_empty());
}

#[tokio::test]
async fn test_source_cannot_claim_another_sources_organization() {
    let network = synced_network().await;
    let transactions = network.aggregate.transactions().len();

    // B is not designated for 1111
    network
        .source_b
        .put(json!({
            "resourceType": "Organization",
            "id": "kaper",
            "name": "Kaper",
            "identifier": [{"system": URA_SYSTEM, "value": "1111"}]
        }))
        .unwrap();
    network
        .source_b
        .put(location("kaper-loc", "kaper", "Kaperlocatie"))
        .unwrap();

    let summary = network.coordinator().run(incremental()).await.unwrap();
    assert_eq!(summary.changes_rejected, 2);
    assert_eq!(network.aggregate.transactions().len(), transactions);
    assert_eq!(
        network
            .copy_of(SOURCE_A, ResourceKind::Organization, "o1")
            .unwrap()
            .name(),
        Some("Zorg Een")
    );
}

#[tokio::test]
async fn test_registry_removal_deletes_the_graph() {
    let network = synced_network().await;
    network.unregister("1111");

    let summary = network.coordinator().run(incremental()).await.unwrap();
    assert!(summary.is_successful());
    assert_eq!(summary.organizations_removed, 1);
    assert!(network
        .copy_of(SOURCE_A, ResourceKind::Organization, "o1")
        .is_none());
    assert!(network
        .copy_of(SOURCE_B, ResourceKind::Organization, "o2")
        .is_some());
}

#[tokio::test]
async fn test_incremental_without_cursor_is_a_configuration_error() {
    let network = Network::new();
    network.register("1111", "Zorg Een", SOURCE_A);

    let result = network.coordinator().run(incremental()).await;
    assert!(matches!(result, Err(AddressBookError::Configuration(_))));

    let since = Utc::now() - Duration::days(1);
    let summary = network
        .coordinator()
        .run(SyncMode::Incremental { since: Some(since) })
        .await
        .unwrap();
    assert!(summary.is_successful());
    assert!(network.storage.snapshot().registry_cursor().is_some());
}

#[tokio::test]
async fn test_source_outage_skips_only_that_source() {
    let network = Network::new();
    network.register("1111", "Zorg Een", SOURCE_A);
    network.register("2222", "Zorg Twee", SOURCE_B);
    seed_organization(&network.source_a, "o1", "1111", "Een");
    seed_organization(&network.source_b, "o2", "2222", "Twee");
    network.source_b.set_unavailable(true);

    let summary = network.coordinator().run(SyncMode::Full).await.unwrap();
    assert!(!summary.is_successful());
    assert!(!summary.has_fatal_error());
    assert_eq!(summary.organizations, 1);
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].error_type, SyncErrorType::Operational);

    let state = network.storage.snapshot();
    let a = SourceUrl::new(SOURCE_A).unwrap();
    let b = SourceUrl::new(SOURCE_B).unwrap();
    assert_eq!(state.sources, vec![a.clone(), b.clone()]);
    assert!(state.source_cursor(&a).is_some());
    assert!(state.source_cursor(&b).is_none());
}

#[tokio::test]
async fn test_query_directory_outage_aborts_the_run() {
    let network = Network::new();
    network.register("1111", "Zorg Een", SOURCE_A);
    seed_organization(&network.source_a, "o1", "1111", "Een");
    network.aggregate.set_unavailable(true);

    let result = network.coordinator().run(SyncMode::Full).await;
    assert!(matches!(result, Err(AddressBookError::Fhir(_))));
    assert!(network.storage.snapshot().registry_cursor().is_none());
}

#[tokio::test]
async fn test_organization_sync_rebuilds_one_organization() {
    let network = Network::new();
    network.register("1111", "Zorg Een", SOURCE_A);
    network.register("2222", "Zorg Twee", SOURCE_B);
    seed_organization(&network.source_a, "o1", "1111", "Een");
    seed_organization(&network.source_b, "o2", "2222", "Twee");

    let summary = network
        .coordinator()
        .run(SyncMode::Organization { ura: ura("2222") })
        .await
        .unwrap();
    assert_eq!(summary.organizations, 1);
    assert!(network
        .copy_of(SOURCE_B, ResourceKind::Organization, "o2")
        .is_some());
    assert!(network
        .copy_of(SOURCE_A, ResourceKind::Organization, "o1")
        .is_none());
    assert_eq!(
        network.storage.snapshot().sources,
        vec![SourceUrl::new(SOURCE_B).unwrap()]
    );
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let network = Network::new();
    network.register("1111", "Zorg Een", SOURCE_A);
    seed_organization(&network.source_a, "o1", "1111", "Een");

    let summary = network
        .coordinator()
        .dry_run(true)
        .run(SyncMode::Full)
        .await
        .unwrap();
    assert!(summary.is_successful());
    assert_eq!(summary.organizations, 1);
    assert!(network.aggregate.is_empty());
    assert!(network.aggregate.transactions().is_empty());
    assert_eq!(network.storage.snapshot(), SyncState::default());
}

#[tokio::test]
async fn test_shutdown_before_start_leaves_everything_untouched() {
    let network = Network::new();
    network.register("1111", "Zorg Een", SOURCE_A);
    seed_organization(&network.source_a, "o1", "1111", "Een");
    network.shut_down();

    let summary = network.coordinator().run(SyncMode::Full).await.unwrap();
    assert!(summary.interrupted);
    assert!(!summary.is_successful());
    assert_eq!(summary.organizations, 0);
    assert!(network.aggregate.is_empty());
    assert!(network.storage.snapshot().registry_cursor().is_none());
}

#[tokio::test]
async fn test_ownership_cycle_is_reported_not_looped() {
    let network = synced_network().await;
    for (id, parent) in [("c1", "c2"), ("c2", "c1")] {
        network
            .source_a
            .put(json!({
                "resourceType": "Organization",
                "id": id,
                "partOf": {"reference": format!("Organization/{parent}")}
            }))
            .unwrap();
    }

    let summary = network.coordinator().run(incremental()).await.unwrap();
    assert_eq!(summary.changes_rejected, 2);
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].error_type, SyncErrorType::Operational);
    assert!(!summary.has_fatal_error());
    assert!(network
        .copy_of(SOURCE_A, ResourceKind::Organization, "c1")
        .is_none());
}

#[tokio::test]
async fn test_record_shared_by_two_organizations_of_one_source_is_copied_once() {
    let network = Network::new();
    network.register("1111", "Zorg Een", SOURCE_A);
    network.register("2222", "Zorg Twee", SOURCE_A);
    network
        .source_a
        .put(endpoint("shared", "https://fhir.example.org/shared"))
        .unwrap();
    for (id, ura) in [("o1", "1111"), ("o2", "2222")] {
        network
            .source_a
            .put(json!({
                "resourceType": "Organization",
                "id": id,
                "name": "Lokaal",
                "identifier": [{"system": URA_SYSTEM, "value": ura}],
                "endpoint": [{"reference": "Endpoint/shared"}]
            }))
            .unwrap();
    }

    let summary = network
        .coordinator_over(Arc::new(YieldingStore(network.aggregate.clone())))
        .parallel_sources(4)
        .run(SyncMode::Full)
        .await
        .unwrap();
    assert!(summary.is_successful(), "{:?}", summary.errors);
    assert_eq!(summary.organizations, 2);

    let provenance = format!("{SOURCE_A}/Endpoint/shared");
    let copies = network
        .aggregate
        .resources(ResourceKind::Endpoint)
        .into_iter()
        .filter(|endpoint| endpoint.provenance() == Some(provenance.as_str()))
        .count();
    assert_eq!(copies, 1);
    assert!(network.aggregate.dangling_references().is_empty());
}

#[tokio::test]
async fn test_incremental_source_outage_keeps_only_that_cursor() {
    let network = synced_network().await;
    let a = SourceUrl::new(SOURCE_A).unwrap();
    let b = SourceUrl::new(SOURCE_B).unwrap();
    let before = network.storage.snapshot();

    network
        .source_a
        .put(location("o1-loc2", "o1", "Tweede locatie"))
        .unwrap();
    network.source_b.set_unavailable(true);

    let summary = network.coordinator().run(incremental()).await.unwrap();
    assert!(!summary.is_successful());
    assert!(!summary.has_fatal_error());
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].error_type, SyncErrorType::Operational);
    assert!(network
        .copy_of(SOURCE_A, ResourceKind::Location, "o1-loc2")
        .is_some());

    let after = network.storage.snapshot();
    assert!(after.source_cursor(&a) > before.source_cursor(&a));
    assert_eq!(after.source_cursor(&b), before.source_cursor(&b));
}

#[tokio::test]
async fn test_incremental_abort_keeps_cursors_of_finished_sources() {
    let network = synced_network().await;
    let a = SourceUrl::new(SOURCE_A).unwrap();
    let b = SourceUrl::new(SOURCE_B).unwrap();
    let before = network.storage.snapshot();

    network
        .source_a
        .put(location("o1-loc2", "o1", "Tweede locatie"))
        .unwrap();
    network
        .source_b
        .put(location("o2-loc2", "o2", "Tweede locatie"))
        .unwrap();

    let aggregate = Arc::new(RefusingStore {
        inner: network.aggregate.clone(),
        source: SOURCE_B,
    });
    let result = network
        .coordinator_over(aggregate)
        .parallel_sources(1)
        .run(incremental())
        .await;
    assert!(matches!(result, Err(AddressBookError::Fhir(_))));

    let after = network.storage.snapshot();
    assert!(after.source_cursor(&a) > before.source_cursor(&a));
    assert_eq!(after.source_cursor(&b), before.source_cursor(&b));
    assert_eq!(after.registry_cursor(), before.registry_cursor());
}
