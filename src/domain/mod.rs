//! Domain models and types.
//!
//! # Overview
//!
//! The domain layer provides:
//! - **Strongly-typed identifiers** ([`Ura`], [`SourceUrl`])
//! - **Resource model** ([`ResourceKind`] with its reference table, [`Resource`], [`ResourceRef`])
//! - **Changes** ([`Change`], [`ChangeMethod`], [`Provenance`])
//! - **Error types** ([`AddressBookError`], [`FhirError`])
//! - **Result type alias** ([`Result`])
//!
//! # Example
//!
//! ```rust
//! use addressbook_sync::domain::{Resource, ResourceKind};
//! use serde_json::json;
//!
//! # fn example() -> addressbook_sync::domain::Result<()> {
//! let location = Resource::from_json(json!({
//!     "resourceType": "Location",
//!     "id": "l1",
//!     "managingOrganization": {"reference": "Organization/o1"}
//! }))?;
//! assert_eq!(location.kind(), ResourceKind::Location);
//! assert_eq!(location.owner().unwrap().id, "o1");
//! # Ok(())
//! # }
//! ```

pub mod change;
pub mod errors;
pub mod ids;
pub mod resource;
pub mod result;

pub use change::{Change, ChangeMethod, Provenance};
pub use errors::{AddressBookError, FhirError};
pub use ids::{SourceUrl, Ura, URA_SYSTEM};
pub use resource::{ReferenceField, Resource, ResourceKind, ResourceRef};
pub use result::Result;
