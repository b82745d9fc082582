//! CLI interface and argument parsing
//!
//! This module provides the command-line interface for Addressbook Sync using clap.

pub mod commands;

use clap::{Parser, Subcommand};

/// Addressbook Sync - FHIR Query Directory update client
#[derive(Parser, Debug)]
#[command(name = "addressbook-sync")]
#[command(version, about, long_about = None)]
#[command(author = "Addressbook Sync Contributors")]
pub struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        default_value = "addressbook-sync.toml",
        env = "ADDRESSBOOK_CONFIG"
    )]
    pub config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "ADDRESSBOOK_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Pull changes from the Admin Directories into the Query Directory
    Sync(commands::sync::SyncArgs),

    /// Validate configuration file
    ValidateConfig(commands::validate::ValidateArgs),

    /// Show sync cursors and tracked Admin Directories
    Status(commands::status::StatusArgs),

    /// Initialize a new configuration file
    Init(commands::init::InitArgs),
}
