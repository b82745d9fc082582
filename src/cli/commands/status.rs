//! Status command implementation
//!
//! This module implements the `status` command for displaying the stored
//! cursors and the tracked Admin Directories.

use crate::config::load_config;
use crate::core::state::{FileStateStorage, StateManager, SyncState};
use chrono::{DateTime, Utc};
use clap::Args;
use std::sync::Arc;

/// Arguments for the status command
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Only show the Admin Directory with this base URL
    #[arg(long, value_name = "URL")]
    pub source: Option<String>,
}

impl StatusArgs {
    /// Execute the status command
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        tracing::info!("Checking sync status");

        println!("📊 Sync Status");
        println!();

        let config = match load_config(config_path) {
            Ok(c) => c,
            Err(e) => {
                println!("❌ Failed to load configuration file");
                println!("   Error: {e}");
                return Ok(2);
            }
        };

        let storage = Arc::new(FileStateStorage::new(&config.sync.state_directory));
        let state = match StateManager::new_with_storage(storage).load().await {
            Ok(s) => s,
            Err(e) => {
                println!("❌ Failed to load sync state");
                println!("   Error: {e}");
                return Ok(5);
            }
        };

        println!("State directory: {}", config.sync.state_directory);
        println!("Registry cursor: {}", format_cursor(state.registry_cursor()));
        println!();

        if state.sources.is_empty() {
            println!("No sync history found.");
            println!("Run 'addressbook-sync sync --full' to start tracking Admin Directories.");
            return Ok(0);
        }

        let rows = self.rows(&state);
        if rows.is_empty() {
            println!("No tracked Admin Directory matches the specified filter.");
            return Ok(0);
        }

        println!("Tracking {} Admin Directory(ies):", rows.len());
        println!();
        println!("{:<60} {:<25}", "Admin Directory", "History Cursor");
        println!("{}", "-".repeat(86));
        for (source, cursor) in rows {
            println!("{:<60} {:<25}", source, format_cursor(cursor));
        }

        println!();
        Ok(0)
    }

    fn rows<'a>(&self, state: &'a SyncState) -> Vec<(&'a str, Option<DateTime<Utc>>)> {
        state
            .sources
            .iter()
            .filter(|source| {
                self.source
                    .as_deref()
                    .map_or(true, |wanted| source.as_str() == wanted.trim_end_matches('/'))
            })
            .map(|source| (source.as_str(), state.source_cursor(source)))
            .collect()
    }
}

fn format_cursor(cursor: Option<DateTime<Utc>>) -> String {
    match cursor {
        Some(at) => at.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => "⏸️  Never".to_string(),
    }
}
