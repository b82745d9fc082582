//! Init command implementation
//!
//! This module implements the `init` command for generating a sample
//! configuration file.

use clap::Args;
use std::fs;
use std::path::Path;

/// Arguments for the init command
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Path where to create the configuration file
    #[arg(short, long, default_value = "addressbook-sync.toml")]
    pub output: String,

    /// Include example values and comments
    #[arg(long)]
    pub with_examples: bool,

    /// Overwrite existing file
    #[arg(long)]
    pub force: bool,
}

impl InitArgs {
    /// Execute the init command
    pub async fn execute(&self) -> anyhow::Result<i32> {
        tracing::info!(output = %self.output, "Initializing configuration file");

        println!("📝 Initializing Addressbook Sync configuration");
        println!();

        if Path::new(&self.output).exists() && !self.force {
            println!("❌ Configuration file already exists: {}", self.output);
            println!("   Use --force to overwrite");
            return Ok(2);
        }

        let config_content = if self.with_examples {
            Self::generate_config_with_examples()
        } else {
            Self::generate_minimal_config()
        };

        match fs::write(&self.output, config_content) {
            Ok(_) => {
                println!("✅ Configuration file created: {}", self.output);
                println!();
                println!("Next steps:");
                println!("  1. Edit {} with your settings", self.output);
                println!("  2. Point [registry] at the LRZa and [query_directory] at your Query Directory");
                println!("     (or set LRZA_BASE_URL and QUERY_DIRECTORY_BASE_URL)");
                println!("  3. Put credentials in a .env file, e.g. ADDRESSBOOK_QUERY_DIRECTORY_TOKEN");
                println!("  4. Validate configuration: addressbook-sync validate-config");
                println!("  5. Run the first sync: addressbook-sync sync --full");
                println!();
                Ok(0)
            }
            Err(e) => {
                println!("❌ Failed to write configuration file");
                println!("   Error: {e}");
                Ok(5)
            }
        }
    }

    /// Generate minimal configuration
    fn generate_minimal_config() -> String {
        r#"# Addressbook Sync Configuration File
# FHIR Query Directory update client

environment = "development"

[application]
log_level = "info"
dry_run = false

[registry]
base_url = "https://lrza.example.org/fhir"

[query_directory]
base_url = "http://query-directory:8080/fhir"

[admin_directory]
timeout_seconds = 30

[sync]
parallel_sources = 4
state_directory = "/var/status"

[logging]
local_enabled = false
local_path = "/var/log/addressbook-sync"
local_rotation = "daily"
"#
        .to_string()
    }

    /// Generate configuration with examples and comments
    fn generate_config_with_examples() -> String {
        r#"# Addressbook Sync Configuration File
# FHIR Query Directory update client
#
# This file contains all configuration options with examples and explanations.
# Values of the form ${VAR_NAME} are taken from the environment (or a .env
# file) when the configuration is loaded.

# Runtime environment: development | staging | production
# TLS verification cannot be disabled in production.
environment = "development"

# ============================================================================
# Application Settings
# ============================================================================
[application]
# Log level (trace, debug, info, warn, error)
log_level = "info"

# Dry run mode: build transactions and log them, never submit them and
# never move the cursors
dry_run = false

# ============================================================================
# Registry (LRZa)
# ============================================================================
# Decides which Admin Directory is authoritative for which organization.
# LRZA_BASE_URL overrides base_url.
[registry]
base_url = "https://lrza.example.org/fhir"

# Authentication type: none | basic | bearer
auth_type = "none"
# token = "${ADDRESSBOOK_REGISTRY_TOKEN}"

# Requested page size (_count) and maximum number of pages per search
page_size = 100
max_pages = 1000

# ============================================================================
# Query Directory
# ============================================================================
# The aggregate kept in sync. QUERY_DIRECTORY_BASE_URL overrides base_url.
[query_directory]
base_url = "http://query-directory:8080/fhir"
auth_type = "none"
# auth_type = "bearer"
# token = "${ADDRESSBOOK_QUERY_DIRECTORY_TOKEN}"

# Request timeout in seconds
timeout_seconds = 60

# Retries for idempotent requests (transactions are never retried)
[query_directory.retry]
max_retries = 3
initial_delay_ms = 1000
max_delay_ms = 30000
backoff_multiplier = 2.0

# ============================================================================
# Admin Directories
# ============================================================================
# Connection settings applied to every Admin Directory. Their base URLs come
# from the registry.
[admin_directory]
auth_type = "none"
timeout_seconds = 30
tls_verify = true

# ============================================================================
# Sync
# ============================================================================
[sync]
# Number of organizations or Admin Directories processed concurrently (1-64)
parallel_sources = 4

# Directory holding cursors.json and sources.json
state_directory = "/var/status"

# ============================================================================
# Logging Configuration
# ============================================================================
[logging]
# Enable local JSON file logging
local_enabled = false

# Local log directory
local_path = "/var/log/addressbook-sync"

# Log rotation: daily | hourly | never
local_rotation = "daily"
"#
        .to_string()
    }
}
