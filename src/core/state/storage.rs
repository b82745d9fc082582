//! State storage backends

use super::cursor::{Cursors, SyncState};
use crate::domain::{AddressBookError, Result, SourceUrl};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const CURSORS_FILE: &str = "cursors.json";
pub const SOURCES_FILE: &str = "sources.json";

/// Persistence for [`SyncState`]
#[async_trait]
pub trait StateStorage: Send + Sync {
    /// Loads the state; absent or unreadable state is returned as the default
    async fn load(&self) -> Result<SyncState>;

    async fn save(&self, state: &SyncState) -> Result<()>;
}

/// Keeps `cursors.json` and `sources.json` in a state directory
pub struct FileStateStorage {
    directory: PathBuf,
}

impl FileStateStorage {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    async fn read_or_default<T>(&self, file: &str) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        let path = self.directory.join(file);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No state file, starting fresh");
                return Ok(T::default());
            }
            Err(e) => {
                return Err(AddressBookError::State(format!(
                    "Failed to read {}: {e}",
                    path.display()
                )))
            }
        };

        match serde_json::from_str(&contents) {
            Ok(value) => Ok(value),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Corrupt state file ignored"
                );
                Ok(T::default())
            }
        }
    }

    /// Writes next to the target and renames into place
    async fn write_atomic<T: Serialize>(&self, file: &str, value: &T) -> Result<()> {
        let path = self.directory.join(file);
        let temp = self.directory.join(format!(".{file}.tmp"));
        let json = serde_json::to_vec_pretty(value)?;

        let state_error = |e: std::io::Error| {
            AddressBookError::State(format!("Failed to write {}: {e}", path.display()))
        };
        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(state_error)?;
        tokio::fs::write(&temp, json).await.map_err(state_error)?;
        tokio::fs::rename(&temp, &path).await.map_err(state_error)?;
        Ok(())
    }
}

#[async_trait]
impl StateStorage for FileStateStorage {
    async fn load(&self) -> Result<SyncState> {
        let cursors: Cursors = self.read_or_default(CURSORS_FILE).await?;
        let sources: Vec<SourceUrl> = self.read_or_default(SOURCES_FILE).await?;
        Ok(SyncState { cursors, sources })
    }

    async fn save(&self, state: &SyncState) -> Result<()> {
        self.write_atomic(CURSORS_FILE, &state.cursors).await?;
        self.write_atomic(SOURCES_FILE, &state.sources).await?;
        tracing::debug!(directory = %self.directory.display(), "State saved");
        Ok(())
    }
}

/// Holds state in memory, for dry runs and tests
#[derive(Default)]
pub struct MemoryStateStorage {
    state: Mutex<SyncState>,
}

impl MemoryStateStorage {
    pub fn new(state: SyncState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn snapshot(&self) -> SyncState {
        match self.state.lock() {
            Ok(state) => state.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl StateStorage for MemoryStateStorage {
    async fn load(&self) -> Result<SyncState> {
        Ok(self.snapshot())
    }

    async fn save(&self, state: &SyncState) -> Result<()> {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = state.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_directory_loads_default() {
        let dir = TempDir::new().unwrap();
        let storage = FileStateStorage::new(dir.path().join("absent"));
        assert_eq!(storage.load().await.unwrap(), SyncState::default());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let storage = FileStateStorage::new(dir.path().join("status"));

        let source = SourceUrl::new("https://ad.example.org/fhir").unwrap();
        let mut state = SyncState::default();
        state.set_registry_cursor(Utc::now());
        state.track(&source);
        state.advance_source(&source, Utc::now());
        storage.save(&state).await.unwrap();

        assert_eq!(storage.load().await.unwrap(), state);
        assert!(!dir.path().join("status").join(".cursors.json.tmp").exists());

        let sources = std::fs::read_to_string(dir.path().join("status").join(SOURCES_FILE)).unwrap();
        assert!(sources.contains("https://ad.example.org/fhir"));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_ignored() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CURSORS_FILE), "{not json").unwrap();
        std::fs::write(dir.path().join(SOURCES_FILE), r#"["https://ad.example.org/fhir"]"#).unwrap();

        let state = FileStateStorage::new(dir.path()).load().await.unwrap();
        assert_eq!(state.cursors, Cursors::default());
        assert_eq!(state.sources.len(), 1);
    }
}
