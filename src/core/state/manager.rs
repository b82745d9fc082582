//! State manager for cursor persistence
//!
//! Loads the state once at the start of a run and saves whatever the run
//! accumulated at the end, also when the run failed halfway.

use super::cursor::SyncState;
use super::storage::StateStorage;
use crate::domain::Result;
use std::sync::Arc;

/// State manager for cursor persistence
pub struct StateManager {
    storage: Arc<dyn StateStorage>,
    read_only: bool,
}

impl StateManager {
    /// Create a new StateManager with a state storage backend
    pub fn new_with_storage(storage: Arc<dyn StateStorage>) -> Self {
        Self {
            storage,
            read_only: false,
        }
    }

    /// Stop (or resume) writing, for dry runs
    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    /// Load the persisted state
    ///
    /// # Errors
    ///
    /// Returns an error if the state exists but cannot be read.
    pub async fn load(&self) -> Result<SyncState> {
        let state = self.storage.load().await?;
        tracing::debug!(
            registry_cursor = ?state.cursors.registry,
            sources = state.sources.len(),
            "Loaded sync state"
        );
        Ok(state)
    }

    /// Persist the state
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be written.
    pub async fn save(&self, state: &SyncState) -> Result<()> {
        if self.read_only {
            tracing::debug!("Read-only state, not saving");
            return Ok(());
        }
        tracing::info!(
            registry_cursor = ?state.cursors.registry,
            sources = state.sources.len(),
            "Checkpointing sync state"
        );
        self.storage.save(state).await
    }
}
