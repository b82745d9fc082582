//! Sync summary and reporting
//!
//! This module defines structures for tracking and reporting sync results.

use crate::core::reconcile::PipelineReport;
use crate::domain::AddressBookError;
use std::time::Duration;

/// Summary of a sync run
#[derive(Debug, Clone)]
pub struct SyncSummary {
    /// Organizations reconciled from a graph snapshot
    pub organizations: usize,

    /// Admin Directories whose history was applied
    pub sources: usize,

    /// Aggregate records created
    pub records_created: usize,

    /// Aggregate records updated in place
    pub records_updated: usize,

    /// Aggregate records deleted
    pub records_deleted: usize,

    /// Candidate changes turned away by authority resolution
    pub changes_rejected: usize,

    /// Organizations whose whole graph was removed from the aggregate
    pub organizations_removed: usize,

    /// Duration of the run
    pub duration: Duration,

    /// Whether a shutdown signal cut the run short
    pub interrupted: bool,

    /// Errors encountered during the run
    pub errors: Vec<SyncError>,
}

impl SyncSummary {
    /// Create a new empty sync summary
    pub fn new() -> Self {
        Self {
            organizations: 0,
            sources: 0,
            records_created: 0,
            records_updated: 0,
            records_deleted: 0,
            changes_rejected: 0,
            organizations_removed: 0,
            duration: Duration::from_secs(0),
            interrupted: false,
            errors: Vec::new(),
        }
    }

    /// Set the duration
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Add the outcome of one pipeline
    pub fn record(&mut self, report: &PipelineReport) {
        self.changes_rejected += report.rejected;
        if report.submitted {
            self.records_created += report.created;
            self.records_updated += report.updated;
            self.records_deleted += report.deleted;
        }
    }

    /// Add an error
    pub fn add_error(&mut self, error: SyncError) {
        self.errors.push(error);
    }

    /// Check if the run completed without errors
    pub fn is_successful(&self) -> bool {
        self.errors.is_empty() && !self.interrupted
    }

    /// Whether any recorded error aborted the run rather than one unit
    pub fn has_fatal_error(&self) -> bool {
        self.errors
            .iter()
            .any(|error| error.error_type != SyncErrorType::Operational)
    }

    /// Log the summary
    pub fn log_summary(&self) {
        tracing::info!(
            organizations = self.organizations,
            sources = self.sources,
            created = self.records_created,
            updated = self.records_updated,
            deleted = self.records_deleted,
            rejected = self.changes_rejected,
            organizations_removed = self.organizations_removed,
            interrupted = self.interrupted,
            duration_secs = self.duration.as_secs(),
            "Sync completed"
        );

        if !self.errors.is_empty() {
            tracing::warn!(error_count = self.errors.len(), "Sync completed with errors");
            for error in &self.errors {
                tracing::warn!(
                    error_type = ?error.error_type,
                    context = ?error.context,
                    message = %error.message,
                    "Sync error"
                );
            }
        }
    }
}

impl Default for SyncSummary {
    fn default() -> Self {
        Self::new()
    }
}

/// Type of sync error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncErrorType {
    /// One organization or source was skipped
    Operational,
    /// Registry or Query Directory unreachable or misbehaving
    Connection,
    /// State could not be read or written
    State,
    /// Configuration error
    Configuration,
    /// Anything else
    Unknown,
}

/// Sync error with context
#[derive(Debug, Clone)]
pub struct SyncError {
    /// Type of error
    pub error_type: SyncErrorType,

    /// Error message
    pub message: String,

    /// Optional context (e.g., source URL, URA)
    pub context: Option<String>,
}

impl SyncError {
    /// Create a new sync error
    pub fn new(error_type: SyncErrorType, message: String) -> Self {
        Self {
            error_type,
            message,
            context: None,
        }
    }

    /// Add context to the error
    pub fn with_context(mut self, context: String) -> Self {
        self.context = Some(context);
        self
    }
}

impl From<&AddressBookError> for SyncError {
    fn from(err: &AddressBookError) -> Self {
        let error_type = if err.is_operational() {
            SyncErrorType::Operational
        } else {
            match err {
                AddressBookError::Fhir(_) => SyncErrorType::Connection,
                AddressBookError::State(_) | AddressBookError::Io(_) => SyncErrorType::State,
                AddressBookError::Configuration(_) => SyncErrorType::Configuration,
                _ => SyncErrorType::Unknown,
            }
        };
        SyncError::new(error_type, err.to_string())
    }
}
