//! Validate config command implementation
//!
//! This module implements the `validate-config` command for validating
//! the Addressbook Sync configuration file.

use crate::config::{load_config, AddressBookConfig, FhirServerConfig};
use clap::Args;

/// Arguments for the validate-config command
#[derive(Args, Debug)]
pub struct ValidateArgs {}

impl ValidateArgs {
    /// Execute the validate-config command
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        tracing::info!(config_path = %config_path, "Validating configuration");

        println!("🔍 Validating configuration file: {config_path}");
        println!();

        // load_config validates as well
        let config = match load_config(config_path) {
            Ok(c) => {
                println!("✅ Configuration file loaded successfully");
                c
            }
            Err(e) => {
                println!("❌ Failed to load configuration file");
                println!("   Error: {e}");
                return Ok(2);
            }
        };

        match config.validate() {
            Ok(_) => {
                println!("✅ Configuration is valid");
                println!();
                print_summary(&config);
                println!();
                Ok(0)
            }
            Err(e) => {
                println!("❌ Configuration validation failed");
                println!("   Error: {e}");
                println!();
                Ok(2)
            }
        }
    }
}

fn print_summary(config: &AddressBookConfig) {
    println!("Configuration Summary:");
    println!("  Environment: {:?}", config.environment);
    println!("  Log Level: {}", config.application.log_level);
    println!("  Dry Run: {}", config.application.dry_run);
    println!("  Registry: {}", describe_server(&config.registry));
    println!("  Query Directory: {}", describe_server(&config.query_directory));
    println!(
        "  Admin Directory Auth: {} (timeout {}s, TLS verify {})",
        config.admin_directory.connection.auth_type,
        config.admin_directory.connection.timeout_seconds,
        config.admin_directory.connection.tls_verify
    );
    println!("  Parallel Sources: {}", config.sync.parallel_sources);
    println!("  State Directory: {}", config.sync.state_directory);
    if config.logging.local_enabled {
        println!(
            "  File Logging: {} ({})",
            config.logging.local_path, config.logging.local_rotation
        );
    } else {
        println!("  File Logging: disabled");
    }
}

fn describe_server(server: &FhirServerConfig) -> String {
    format!("{} (auth: {})", server.base_url, server.auth_type)
}
