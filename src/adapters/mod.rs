//! External system integrations.
//!
//! - [`fhir`] - FHIR record store contract, HTTP client and the organization
//!   graph walker (plus an in-memory store behind the `test-support` feature)
//! - [`registry`] - The registry (LRZa) deciding authority per URA
//! - [`admin_directory`] - Admin Directories, the sources of truth
//! - [`query_directory`] - The Query Directory, the aggregate kept in sync
//!
//! # Design Pattern
//!
//! Every server is reached through the [`fhir::FhirStore`] trait, so the
//! reconciliation core can be exercised end to end against in-memory stores.
//!
//! ```rust,no_run
//! use addressbook_sync::adapters::fhir::FhirClient;
//! use addressbook_sync::adapters::registry::{Lrza, RegistryClient};
//! use addressbook_sync::config::FhirServerConfig;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = FhirClient::new(&FhirServerConfig::for_url("https://lrza.example.org/fhir"))?;
//! let registry = Lrza::new(Arc::new(client));
//!
//! for organization in registry.list_authoritative_organizations().await? {
//!     println!("{} -> {}", organization.ura, organization.endpoint);
//! }
//! # Ok(())
//! # }
//! ```

pub mod admin_directory;
pub mod fhir;
pub mod query_directory;
pub mod registry;

pub use admin_directory::{AdminDirectory, HttpSourceConnector, SourceConnector};
#[cfg(any(test, feature = "test-support"))]
pub use admin_directory::StaticSourceConnector;
pub use query_directory::QueryDirectory;
pub use registry::{Lrza, RegistryClient};
