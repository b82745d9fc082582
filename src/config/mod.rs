//! Configuration management.
//!
//! TOML configuration with:
//! - Environment variable substitution (`${VAR_NAME}`)
//! - Default values for optional settings
//! - Environment variable overrides (`ADDRESSBOOK_*`, `LRZA_BASE_URL`,
//!   `QUERY_DIRECTORY_BASE_URL`)
//! - Validation on load
//!
//! # Configuration Structure
//!
//! - [`ApplicationConfig`] - Log level and dry-run mode
//! - [`FhirServerConfig`] - `[registry]` and `[query_directory]` connections
//! - [`AdminDirectoryConfig`] - Connection settings shared by every Admin Directory
//! - [`SyncConfig`] - Concurrency and the state directory
//! - [`LoggingConfig`] - Local file logging
//!
//! # Example Configuration
//!
//! ```toml
//! [application]
//! log_level = "info"
//!
//! [registry]
//! base_url = "https://lrza.example.org/fhir"
//!
//! [query_directory]
//! base_url = "http://query-directory:8080/fhir"
//! auth_type = "bearer"
//! token = "${QUERY_DIRECTORY_TOKEN}"
//!
//! [admin_directory]
//! timeout_seconds = 30
//!
//! [sync]
//! parallel_sources = 4
//! state_directory = "/var/status"
//! ```

pub mod loader;
pub mod schema;
pub mod secret;

pub use loader::load_config;
pub use schema::{
    AddressBookConfig, AdminDirectoryConfig, ApplicationConfig, Environment, FhirServerConfig,
    LoggingConfig, RetryConfig, SyncConfig,
};
pub use secret::{
    basic_authorization, bearer_authorization, secret_string, SecretString, SecretValue,
};
