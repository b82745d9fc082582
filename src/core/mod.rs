//! Core business logic for Addressbook Sync.
//!
//! This module contains the reconciliation engine and the orchestration of
//! sync runs.
//!
//! # Modules
//!
//! - [`reconcile`] - Authority resolution, reference rewriting and transaction building
//! - [`state`] - Cursor and tracked-source persistence for incremental runs
//! - [`sync`] - Sync orchestration (full, incremental, single organization) and summaries
//!
//! # Sync Workflow
//!
//! A typical incremental run:
//!
//! 1. **Load State**: Read the registry cursor, source cursors and tracked sources
//! 2. **Registry Changes**: Rebuild or remove every organization the registry changed
//! 3. **Source History**: Pull each tracked Admin Directory's history since its cursor
//! 4. **Authority**: Keep only changes the source is authoritative for
//! 5. **Rewrite**: Map source references onto Query Directory ids
//! 6. **Commit**: Submit one transaction per source
//! 7. **Checkpoint**: Advance the cursors of everything that committed
//!
//! # Example
//!
//! ```rust,no_run
//! use addressbook_sync::config::load_config;
//! use addressbook_sync::core::sync::{SyncCoordinator, SyncMode};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Load configuration
//! let config = load_config("addressbook-sync.toml")?;
//!
//! // Create shutdown signal
//! let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//!
//! // Create sync coordinator
//! let coordinator = SyncCoordinator::new(&config, shutdown_rx)?;
//!
//! // Run an incremental sync from the stored cursors
//! let summary = coordinator.run(SyncMode::Incremental { since: None }).await?;
//!
//! println!("Created: {}", summary.records_created);
//! println!("Updated: {}", summary.records_updated);
//! println!("Deleted: {}", summary.records_deleted);
//! # Ok(())
//! # }
//! ```

pub mod reconcile;
pub mod state;
pub mod sync;
