//! FHIR record store access
//!
//! [`FhirStore`] is the narrow contract the rest of the crate uses to talk to a
//! FHIR server: the registry, every Admin Directory and the Query Directory are
//! all reached through it. [`FhirClient`] implements it over HTTP. With the
//! `test-support` feature, `InMemoryFhirStore` implements it in memory for
//! tests.

pub mod client;
pub mod graph;
#[cfg(any(test, feature = "test-support"))]
pub mod memory;
pub mod models;

pub use client::FhirClient;
pub use graph::{OrganizationGraph, OrganizationGraphWalker};
#[cfg(any(test, feature = "test-support"))]
pub use memory::InMemoryFhirStore;
pub use models::{Bundle, BundleEntry, BundleRequest, BundleResponse, HistoryEntry, SearchResult};

use crate::domain::{ResourceKind, Resource, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Typed read/search/history/transaction operations on a FHIR server
#[async_trait]
pub trait FhirStore: Send + Sync {
    /// Reads one resource
    ///
    /// A missing resource is `FhirError::NotFound`, a deleted one
    /// `FhirError::Gone`.
    async fn read(&self, kind: ResourceKind, id: &str) -> Result<Resource>;

    /// Runs a search, following `next` links
    async fn search(&self, kind: ResourceKind, params: &[(&str, String)]) -> Result<SearchResult>;

    /// Type or instance history, newest first
    async fn history(
        &self,
        kind: ResourceKind,
        id: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<HistoryEntry>>;

    /// Submits a transaction bundle; all or nothing
    async fn transaction(&self, bundle: &Bundle) -> Result<Bundle>;

    /// Base URL of the server, for logging
    fn base_url(&self) -> &str;
}
