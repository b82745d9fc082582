//! Logging and observability
//!
//! Structured logging on top of `tracing`, with helper macros for the events
//! every sync run emits.
//!
//! # Example
//!
//! ```no_run
//! use addressbook_sync::logging::init_logging;
//! use addressbook_sync::config::LoggingConfig;
//!
//! let _guard = init_logging("info", &LoggingConfig::default()).expect("Failed to initialize logging");
//!
//! tracing::info!(source = "https://ad.example.org/fhir", "Pulling history");
//! ```

pub mod structured;

pub use structured::{init_logging, LoggingGuard};

/// Log a retry attempt
///
/// # Example
///
/// ```no_run
/// use addressbook_sync::log_retry_attempt;
///
/// log_retry_attempt!(2, 3, 2000u64, "Connection timeout");
/// ```
#[macro_export]
macro_rules! log_retry_attempt {
    ($attempt:expr, $max_attempts:expr, $delay_ms:expr, $reason:expr) => {
        tracing::warn!(
            attempt = $attempt,
            max_attempts = $max_attempts,
            delay_ms = $delay_ms,
            reason = %$reason,
            "Retrying request after error"
        );
    };
}

/// Log the outcome of one reconciliation pipeline
///
/// # Example
///
/// ```no_run
/// use addressbook_sync::log_pipeline_complete;
/// use addressbook_sync::core::reconcile::PipelineReport;
///
/// let report = PipelineReport::default();
/// log_pipeline_complete!("https://ad.example.org/fhir", &report);
/// ```
#[macro_export]
macro_rules! log_pipeline_complete {
    ($source:expr, $report:expr) => {
        tracing::info!(
            source = %$source,
            received = $report.received,
            accepted = $report.accepted,
            rejected = $report.rejected,
            fetched = $report.fetched,
            created = $report.created,
            updated = $report.updated,
            deleted = $report.deleted,
            submitted = $report.submitted,
            "Reconciliation complete"
        );
    };
}

/// Log an operational failure that skips one unit of work
#[macro_export]
macro_rules! log_skipped_unit {
    ($unit:expr, $error:expr) => {
        tracing::warn!(
            unit = %$unit,
            error = %$error,
            "Skipping after operational error"
        );
    };
}
