//! Sync command implementation
//!
//! This module implements the `sync` command, which brings the Query
//! Directory up to date with the Admin Directories.

use crate::config::load_config;
use crate::core::sync::{SyncCoordinator, SyncMode, SyncSummary};
use crate::domain::{AddressBookError, Ura};
use chrono::{DateTime, NaiveDate, Utc};
use clap::Args;
use tokio::sync::watch;

/// Arguments for the sync command
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Rebuild every registered organization instead of applying history
    #[arg(short, long, conflicts_with_all = ["since", "organization"])]
    pub full: bool,

    /// Apply history since this moment instead of the stored cursors
    /// (RFC 3339 timestamp or YYYY-MM-DD)
    #[arg(long, value_parser = parse_since, conflicts_with = "organization")]
    pub since: Option<DateTime<Utc>>,

    /// Rebuild only the organization with this URA
    #[arg(long, value_name = "URA")]
    pub organization: Option<Ura>,

    /// Dry run mode - build transactions without submitting them
    #[arg(long)]
    pub dry_run: bool,
}

impl SyncArgs {
    /// The run these arguments ask for
    pub fn mode(&self) -> SyncMode {
        if self.full {
            SyncMode::Full
        } else if let Some(ura) = &self.organization {
            SyncMode::Organization { ura: ura.clone() }
        } else {
            SyncMode::Incremental { since: self.since }
        }
    }

    /// Execute the sync command
    pub async fn execute(
        &self,
        config_path: &str,
        shutdown_signal: watch::Receiver<bool>,
    ) -> anyhow::Result<i32> {
        tracing::info!("Starting sync command");

        let mut config = match load_config(config_path) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, "Failed to load configuration");
                eprintln!("Failed to load configuration: {e}");
                return Ok(2);
            }
        };

        if self.dry_run {
            tracing::info!("Enabling dry-run mode from CLI");
            config.application.dry_run = true;
        }

        if let Err(e) = config.validate() {
            tracing::error!(error = %e, "Configuration validation failed");
            eprintln!("Configuration validation failed: {e}");
            return Ok(2);
        }

        if config.application.dry_run {
            tracing::info!("Dry run mode enabled - no transactions will be submitted");
            println!("🔍 DRY RUN MODE - No changes will be written to the Query Directory");
            println!();
        }

        let coordinator = match SyncCoordinator::new(&config, shutdown_signal) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, "Failed to create sync coordinator");
                eprintln!("Failed to initialize sync: {e}");
                return Ok(setup_exit_code(&e));
            }
        };

        let mode = self.mode();
        println!("🚀 Starting {} sync...", describe(&mode));
        println!();

        let summary = match coordinator.run(mode).await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "Sync failed");
                eprintln!("Sync failed: {e}");
                return Ok(run_exit_code(&e));
            }
        };

        print_summary(&summary);
        Ok(exit_code(&summary))
    }
}

/// Accepts an RFC 3339 timestamp or a plain date (midnight UTC)
fn parse_since(value: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(value) {
        return Ok(timestamp.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc())
        .ok_or_else(|| format!("'{value}' is not an RFC 3339 timestamp or YYYY-MM-DD date"))
}

fn describe(mode: &SyncMode) -> String {
    match mode {
        SyncMode::Full => "full".to_string(),
        SyncMode::Incremental { since: None } => "incremental".to_string(),
        SyncMode::Incremental { since: Some(since) } => {
            format!("incremental (since {})", since.to_rfc3339())
        }
        SyncMode::Organization { ura } => format!("organization {ura}"),
    }
}

/// Exit code for a coordinator that could not be built
fn setup_exit_code(error: &AddressBookError) -> i32 {
    match error {
        AddressBookError::Configuration(_) => 2,
        _ => 4,
    }
}

/// Exit code for a run that aborted
fn run_exit_code(error: &AddressBookError) -> i32 {
    match error {
        AddressBookError::Configuration(_) => 2,
        _ => 5,
    }
}

/// Exit code for a run that finished
fn exit_code(summary: &SyncSummary) -> i32 {
    if summary.interrupted {
        130
    } else if summary.is_successful() {
        0
    } else {
        1
    }
}

fn print_summary(summary: &SyncSummary) {
    println!();
    println!("📊 Sync Summary:");
    println!("  Organizations: {}", summary.organizations);
    println!("  Admin Directories: {}", summary.sources);
    println!("  Created: {}", summary.records_created);
    println!("  Updated: {}", summary.records_updated);
    println!("  Deleted: {}", summary.records_deleted);
    println!("  Rejected: {}", summary.changes_rejected);
    println!("  Organizations removed: {}", summary.organizations_removed);
    println!("  Duration: {:.2}s", summary.duration.as_secs_f64());
    println!();

    if !summary.errors.is_empty() {
        println!("⚠️  Errors encountered:");
        for error in &summary.errors {
            println!("  - {:?}: {}", error.error_type, error.message);
            if let Some(context) = &error.context {
                println!("    Context: {context}");
            }
        }
        println!();
    }

    if summary.interrupted {
        println!("⚠️  Sync interrupted gracefully. Completed work is saved.");
        println!("   Run the same command to continue from the stored cursors.");
        println!();
        tracing::info!("Sync interrupted by user signal");
    } else if summary.is_successful() {
        println!("✅ Sync completed successfully!");
    } else {
        println!("⚠️  Sync completed with skipped organizations or sources");
    }
}
