//! Configuration schema types

use crate::config::SecretString;
use serde::{Deserialize, Serialize};

/// Runtime environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Development environment
    #[default]
    Development,
    /// Staging environment
    Staging,
    /// Production environment
    Production,
}

/// Root configuration, mapped from the TOML file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressBookConfig {
    /// Application-level settings
    #[serde(default)]
    pub application: ApplicationConfig,

    /// Runtime environment (development, staging, production)
    #[serde(default)]
    pub environment: Environment,

    /// The registry (LRZa) deciding which Admin Directory is authoritative
    #[serde(default)]
    pub registry: FhirServerConfig,

    /// The Query Directory kept in sync
    #[serde(default)]
    pub query_directory: FhirServerConfig,

    /// Connection settings applied to every Admin Directory
    #[serde(default)]
    pub admin_directory: AdminDirectoryConfig,

    /// Sync orchestration settings
    #[serde(default)]
    pub sync: SyncConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AddressBookConfig {
    /// Validates the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid
    pub fn validate(&self) -> Result<(), String> {
        self.application.validate()?;
        self.registry.validate("registry", &self.environment)?;
        self.query_directory
            .validate("query_directory", &self.environment)?;
        self.admin_directory.validate(&self.environment)?;
        self.sync.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Dry run mode (build transactions, never submit them)
    #[serde(default)]
    pub dry_run: bool,
}

impl ApplicationConfig {
    fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            ));
        }
        Ok(())
    }
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            dry_run: false,
        }
    }
}

/// Retry configuration for idempotent requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Initial delay in milliseconds
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Maximum delay in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Backoff multiplier
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryConfig {
    fn validate(&self, section: &str) -> Result<(), String> {
        if self.max_retries == 0 {
            return Err(format!("{section}.retry.max_retries must be > 0"));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(format!("{section}.retry.backoff_multiplier must be >= 1.0"));
        }
        Ok(())
    }
}

/// Connection settings for one FHIR server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FhirServerConfig {
    /// FHIR base URL
    #[serde(default)]
    pub base_url: String,

    /// Authentication type (none, basic, bearer)
    #[serde(default = "default_auth_type")]
    pub auth_type: String,

    /// Username for basic authentication
    #[serde(default)]
    pub username: Option<String>,

    /// Password for basic authentication
    #[serde(default)]
    pub password: Option<SecretString>,

    /// Token for bearer authentication
    #[serde(default)]
    pub token: Option<SecretString>,

    /// TLS certificate verification
    ///
    /// May only be disabled outside production.
    #[serde(default = "default_true")]
    pub tls_verify: bool,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Requested page size (`_count`) for searches and history
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Maximum number of `next` links followed per search
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    /// Retry configuration
    #[serde(default)]
    pub retry: RetryConfig,
}

impl FhirServerConfig {
    /// Configuration for `base_url` with every other setting at its default
    pub fn for_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    fn validate(&self, section: &str, environment: &Environment) -> Result<(), String> {
        if self.base_url.is_empty() {
            return Err(format!("{section}.base_url cannot be empty"));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(format!(
                "{section}.base_url must start with http:// or https://"
            ));
        }
        self.validate_connection(section, environment)
    }

    fn validate_connection(&self, section: &str, environment: &Environment) -> Result<(), String> {
        use secrecy::ExposeSecret;

        let valid_auth_types = ["none", "basic", "bearer"];
        if !valid_auth_types.contains(&self.auth_type.as_str()) {
            return Err(format!(
                "Invalid {section}.auth_type '{}'. Must be one of: {}",
                self.auth_type,
                valid_auth_types.join(", ")
            ));
        }

        if self.auth_type == "basic" {
            if self.username.as_deref().map(str::is_empty).unwrap_or(true) {
                return Err(format!(
                    "{section}.username cannot be empty when auth_type is 'basic'"
                ));
            }
            if self
                .password
                .as_ref()
                .map(|s| s.expose_secret().is_empty())
                .unwrap_or(true)
            {
                return Err(format!(
                    "{section}.password cannot be empty when auth_type is 'basic'"
                ));
            }
        }

        if self.auth_type == "bearer"
            && self
                .token
                .as_ref()
                .map(|s| s.expose_secret().is_empty())
                .unwrap_or(true)
        {
            return Err(format!(
                "{section}.token cannot be empty when auth_type is 'bearer'"
            ));
        }

        if self.timeout_seconds == 0 {
            return Err(format!("{section}.timeout_seconds must be > 0"));
        }
        if self.page_size == 0 || self.page_size > 1000 {
            return Err(format!("{section}.page_size must be between 1 and 1000"));
        }
        if self.max_pages == 0 {
            return Err(format!("{section}.max_pages must be > 0"));
        }

        if *environment == Environment::Production && !self.tls_verify {
            return Err(format!(
                "{section}.tls_verify cannot be disabled in production environments"
            ));
        }

        self.retry.validate(section)
    }
}

impl Default for FhirServerConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            auth_type: default_auth_type(),
            username: None,
            password: None,
            token: None,
            tls_verify: true,
            timeout_seconds: default_timeout_seconds(),
            page_size: default_page_size(),
            max_pages: default_max_pages(),
            retry: RetryConfig::default(),
        }
    }
}

/// Connection settings shared by every Admin Directory
///
/// The base URL of each Admin Directory comes from the registry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdminDirectoryConfig {
    #[serde(flatten)]
    pub connection: FhirServerConfig,
}

impl AdminDirectoryConfig {
    /// Connection settings for one Admin Directory
    pub fn server_config(&self, base_url: &str) -> FhirServerConfig {
        FhirServerConfig {
            base_url: base_url.to_string(),
            ..self.connection.clone()
        }
    }

    fn validate(&self, environment: &Environment) -> Result<(), String> {
        self.connection
            .validate_connection("admin_directory", environment)
    }
}

/// Sync orchestration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Number of organizations or sources processed concurrently
    #[serde(default = "default_parallel_sources")]
    pub parallel_sources: usize,

    /// Directory holding cursor and tracked-source state
    #[serde(default = "default_state_directory")]
    pub state_directory: String,
}

impl SyncConfig {
    fn validate(&self) -> Result<(), String> {
        if self.parallel_sources == 0 || self.parallel_sources > 64 {
            return Err("sync.parallel_sources must be between 1 and 64".to_string());
        }
        if self.state_directory.is_empty() {
            return Err("sync.state_directory cannot be empty".to_string());
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            parallel_sources: default_parallel_sources(),
            state_directory: default_state_directory(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Enable local JSON file logging
    #[serde(default)]
    pub local_enabled: bool,

    /// Local log directory
    #[serde(default = "default_local_path")]
    pub local_path: String,

    /// Log rotation strategy (daily, hourly, never)
    #[serde(default = "default_local_rotation")]
    pub local_rotation: String,
}

impl LoggingConfig {
    fn validate(&self) -> Result<(), String> {
        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&self.local_rotation.as_str()) {
            return Err(format!(
                "Invalid logging.local_rotation '{}'. Must be one of: {}",
                self.local_rotation,
                valid_rotations.join(", ")
            ));
        }
        if self.local_enabled && self.local_path.is_empty() {
            return Err("logging.local_path cannot be empty when local logging is enabled".to_string());
        }
        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            local_enabled: false,
            local_path: default_local_path(),
            local_rotation: default_local_rotation(),
        }
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_auth_type() -> String {
    "none".to_string()
}

fn default_true() -> bool {
    true
}

fn default_timeout_seconds() -> u64 {
    60
}

fn default_page_size() -> usize {
    100
}

fn default_max_pages() -> usize {
    1000
}

fn default_max_retries() -> usize {
    3
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_parallel_sources() -> usize {
    4
}

fn default_state_directory() -> String {
    "/var/status".to_string()
}

fn default_local_path() -> String {
    "/var/log/addressbook-sync".to_string()
}

fn default_local_rotation() -> String {
    "daily".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::secret_string;

    fn valid_config() -> AddressBookConfig {
        AddressBookConfig {
            application: ApplicationConfig::default(),
            environment: Environment::Development,
            registry: FhirServerConfig::for_url("https://lrza.example.org/fhir"),
            query_directory: FhirServerConfig::for_url("http://query-directory:8080/fhir"),
            admin_directory: AdminDirectoryConfig::default(),
            sync: SyncConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_application_config_validation() {
        let mut config = ApplicationConfig::default();
        assert!(config.validate().is_ok());

        config.log_level = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_base_url() {
        let mut config = valid_config();
        config.registry.base_url = String::new();
        let err = config.validate().unwrap_err();
        assert!(err.contains("registry.base_url"));
    }

    #[test]
    fn test_basic_auth_requires_credentials() {
        let mut server = FhirServerConfig::for_url("https://lrza.example.org/fhir");
        server.auth_type = "basic".to_string();
        assert!(server.validate("registry", &Environment::Development).is_err());

        server.username = Some("sync".to_string());
        server.password = Some(secret_string("pass".to_string()));
        assert!(server.validate("registry", &Environment::Development).is_ok());
    }

    #[test]
    fn test_bearer_auth_requires_token() {
        let mut server = FhirServerConfig::for_url("https://lrza.example.org/fhir");
        server.auth_type = "bearer".to_string();
        assert!(server.validate("registry", &Environment::Development).is_err());

        server.token = Some(secret_string("t0k3n".to_string()));
        assert!(server.validate("registry", &Environment::Development).is_ok());
    }

    #[test]
    fn test_tls_verify_enforced_in_production() {
        let mut server = FhirServerConfig::for_url("https://lrza.example.org/fhir");
        server.tls_verify = false;
        assert!(server.validate("registry", &Environment::Development).is_ok());
        assert!(server.validate("registry", &Environment::Production).is_err());
    }

    #[test]
    fn test_parallel_sources_bounds() {
        let mut sync = SyncConfig::default();
        sync.parallel_sources = 0;
        assert!(sync.validate().is_err());
        sync.parallel_sources = 65;
        assert!(sync.validate().is_err());
        sync.parallel_sources = 8;
        assert!(sync.validate().is_ok());
    }

    #[test]
    fn test_admin_directory_server_config() {
        let mut admin = AdminDirectoryConfig::default();
        admin.connection.timeout_seconds = 5;
        let server = admin.server_config("https://ad.example.org/fhir");
        assert_eq!(server.base_url, "https://ad.example.org/fhir");
        assert_eq!(server.timeout_seconds, 5);
    }

    #[test]
    fn test_logging_rotation_validation() {
        let mut logging = LoggingConfig::default();
        assert!(logging.validate().is_ok());
        logging.local_rotation = "weekly".to_string();
        assert!(logging.validate().is_err());
    }
}
