//! Sync cursors and tracked sources
//!
//! A cursor is the point in time up to which a history has been applied. The
//! registry has one cursor; every tracked Admin Directory has its own.

use crate::domain::SourceUrl;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Contents of `cursors.json`
///
/// # Examples
///
/// ```
/// use addressbook_sync::core::state::Cursors;
///
/// let cursors: Cursors = serde_json::from_str(
///     r#"{"registry": "2025-03-01T12:00:00Z", "sources": {"https://ad.example.org/fhir": "2025-03-01T12:00:00Z"}}"#,
/// ).unwrap();
/// assert!(cursors.registry.is_some());
/// assert_eq!(cursors.sources.len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursors {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<DateTime<Utc>>,

    #[serde(default)]
    pub sources: BTreeMap<SourceUrl, DateTime<Utc>>,
}

/// Everything a sync run needs from the previous one
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncState {
    pub cursors: Cursors,

    /// Admin Directories followed by incremental runs
    pub sources: Vec<SourceUrl>,
}

impl SyncState {
    pub fn registry_cursor(&self) -> Option<DateTime<Utc>> {
        self.cursors.registry
    }

    pub fn source_cursor(&self, source: &SourceUrl) -> Option<DateTime<Utc>> {
        self.cursors.sources.get(source).copied()
    }

    pub fn set_registry_cursor(&mut self, at: DateTime<Utc>) {
        self.cursors.registry = Some(at);
    }

    /// Moves a source cursor forward; an older timestamp is ignored
    pub fn advance_source(&mut self, source: &SourceUrl, at: DateTime<Utc>) {
        let cursor = self.cursors.sources.entry(source.clone()).or_insert(at);
        if *cursor < at {
            *cursor = at;
        }
    }

    /// Starts following a source; returns false when it was already tracked
    pub fn track(&mut self, source: &SourceUrl) -> bool {
        if self.sources.contains(source) {
            return false;
        }
        self.sources.push(source.clone());
        self.sources.sort();
        true
    }

    /// Replaces the tracked sources, dropping cursors of sources no longer tracked
    pub fn replace_sources(&mut self, sources: impl IntoIterator<Item = SourceUrl>) {
        let mut sources: Vec<SourceUrl> = sources.into_iter().collect();
        sources.sort();
        sources.dedup();
        self.cursors
            .sources
            .retain(|source, _| sources.binary_search(source).is_ok());
        self.sources = sources;
    }
}
