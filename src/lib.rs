// Addressbook Sync - FHIR Query Directory update client
// Copyright (c) 2025 Addressbook Sync Contributors
// Licensed under the MIT License

//! # Addressbook Sync
//!
//! Addressbook Sync keeps a read-optimized FHIR "Query Directory" in sync with the
//! many independently operated "Admin Directories" of healthcare providers. Which
//! Admin Directory is authoritative for an organization is decided by a central
//! registry (the LRZa).
//!
//! ## Overview
//!
//! This library provides:
//! - **Pulling** organization graphs and change history from Admin Directories
//! - **Resolving authority** for every incoming change against the registry and the
//!   records already present in the Query Directory
//! - **Rewriting** references from source-local ids to Query Directory ids
//! - **Applying** each change set as one atomic FHIR transaction
//! - **Tracking** per-source history cursors for incremental sync
//!
//! ## Architecture
//!
//! - [`cli`] - Command-line interface and argument parsing
//! - [`core`] - Reconciliation pipeline, sync orchestration and cursor state
//! - [`adapters`] - FHIR REST client, registry, Admin and Query Directory adapters
//! - [`domain`] - Resource kinds, changes, identifiers and errors
//! - [`config`] - Configuration management
//! - [`logging`] - Structured logging
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use addressbook_sync::config::load_config;
//! use addressbook_sync::core::sync::{SyncCoordinator, SyncMode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = load_config("addressbook-sync.toml")?;
//!     let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//!
//!     let coordinator = SyncCoordinator::new(&config, shutdown_rx)?;
//!     let summary = coordinator.run(SyncMode::Incremental { since: None }).await?;
//!
//!     println!("Created {} records", summary.records_created);
//!     Ok(())
//! }
//! ```
//!
//! ## Authority
//!
//! A change from an Admin Directory is only accepted when that directory is
//! authoritative for it: the record is already tracked from that directory, it is
//! a root organization the registry designates the directory for, or its owning
//! organization is accepted in the same batch or already present in the Query
//! Directory. See [`core::reconcile::authority`].
//!
//! ## Error Handling
//!
//! All fallible library operations return [`domain::Result`]. Errors are split
//! into operational errors, which skip one organization or source, and
//! infrastructural errors, which abort the run:
//!
//! ```rust
//! use addressbook_sync::domain::AddressBookError;
//!
//! let err = AddressBookError::NotAuthoritative("no endpoint for URA 1234".to_string());
//! assert!(err.is_operational());
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod logging;
