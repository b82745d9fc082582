//! Configuration loader with TOML parsing and environment variable overrides

use super::schema::AddressBookConfig;
use super::secret::secret_string;
use crate::domain::errors::AddressBookError;
use crate::domain::result::Result;
use regex::Regex;
use std::fs;
use std::path::Path;

/// Loads configuration from a TOML file
///
/// This function:
/// 1. Reads the TOML file
/// 2. Performs environment variable substitution (${VAR} syntax)
/// 3. Parses the TOML into AddressBookConfig
/// 4. Applies environment variable overrides (ADDRESSBOOK_* prefix, plus
///    `LRZA_BASE_URL` and `QUERY_DIRECTORY_BASE_URL`)
/// 5. Validates the configuration
///
/// # Errors
///
/// Returns [`AddressBookError::Configuration`] if the file cannot be read or
/// parsed, a referenced environment variable is missing, or validation fails.
///
/// # Examples
///
/// ```no_run
/// use addressbook_sync::config::loader::load_config;
///
/// let config = load_config("addressbook-sync.toml").expect("Failed to load config");
/// ```
pub fn load_config(path: impl AsRef<Path>) -> Result<AddressBookConfig> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(AddressBookError::Configuration(format!(
            "Configuration file not found: {}",
            path.display()
        )));
    }

    let contents = fs::read_to_string(path).map_err(|e| {
        AddressBookError::Configuration(format!(
            "Failed to read configuration file {}: {}",
            path.display(),
            e
        ))
    })?;

    let contents = substitute_env_vars(&contents)?;

    let mut config: AddressBookConfig = toml::from_str(&contents)
        .map_err(|e| AddressBookError::Configuration(format!("Failed to parse TOML: {e}")))?;

    apply_env_overrides(&mut config);

    config.validate().map_err(|e| {
        AddressBookError::Configuration(format!("Configuration validation failed: {e}"))
    })?;

    Ok(config)
}

/// Substitutes environment variables in the format ${VAR_NAME}
///
/// Comment lines are left untouched.
///
/// # Errors
///
/// Returns an error listing every referenced variable that is not set
fn substitute_env_vars(input: &str) -> Result<String> {
    let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")
        .map_err(|e| AddressBookError::Other(format!("Invalid substitution pattern: {e}")))?;
    let mut lines = Vec::new();
    let mut missing_vars: Vec<String> = Vec::new();

    for line in input.lines() {
        if line.trim_start().starts_with('#') {
            lines.push(line.to_string());
            continue;
        }

        let mut processed_line = line.to_string();
        for cap in re.captures_iter(line) {
            let var_name = &cap[1];
            match std::env::var(var_name) {
                Ok(value) => {
                    processed_line = processed_line.replace(&format!("${{{var_name}}}"), &value);
                }
                Err(_) => {
                    if !missing_vars.iter().any(|v| v == var_name) {
                        missing_vars.push(var_name.to_string());
                    }
                }
            }
        }
        lines.push(processed_line);
    }

    if !missing_vars.is_empty() {
        return Err(AddressBookError::Configuration(format!(
            "Missing required environment variables: {}",
            missing_vars.join(", ")
        )));
    }

    Ok(lines.join("\n"))
}

/// Applies environment variable overrides
///
/// Variables follow the pattern `ADDRESSBOOK_<SECTION>_<KEY>`, for example
/// `ADDRESSBOOK_SYNC_PARALLEL_SOURCES`. The base URLs can also be given as
/// `LRZA_BASE_URL` and `QUERY_DIRECTORY_BASE_URL`, which the prefixed
/// variables override.
fn apply_env_overrides(config: &mut AddressBookConfig) {
    let env = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

    // Application overrides
    if let Some(val) = env("ADDRESSBOOK_APPLICATION_LOG_LEVEL") {
        config.application.log_level = val;
    }
    if let Some(val) = env("ADDRESSBOOK_APPLICATION_DRY_RUN") {
        config.application.dry_run = val.parse().unwrap_or(false);
    }

    // Registry overrides
    if let Some(val) = env("LRZA_BASE_URL") {
        config.registry.base_url = val;
    }
    if let Some(val) = env("ADDRESSBOOK_REGISTRY_BASE_URL") {
        config.registry.base_url = val;
    }
    if let Some(val) = env("ADDRESSBOOK_REGISTRY_TOKEN") {
        config.registry.token = Some(secret_string(val));
    }

    // Query Directory overrides
    if let Some(val) = env("QUERY_DIRECTORY_BASE_URL") {
        config.query_directory.base_url = val;
    }
    if let Some(val) = env("ADDRESSBOOK_QUERY_DIRECTORY_BASE_URL") {
        config.query_directory.base_url = val;
    }
    if let Some(val) = env("ADDRESSBOOK_QUERY_DIRECTORY_USERNAME") {
        config.query_directory.username = Some(val);
    }
    if let Some(val) = env("ADDRESSBOOK_QUERY_DIRECTORY_PASSWORD") {
        config.query_directory.password = Some(secret_string(val));
    }
    if let Some(val) = env("ADDRESSBOOK_QUERY_DIRECTORY_TOKEN") {
        config.query_directory.token = Some(secret_string(val));
    }

    // Admin Directory overrides
    if let Some(val) = env("ADDRESSBOOK_ADMIN_DIRECTORY_TIMEOUT_SECONDS") {
        if let Ok(timeout) = val.parse() {
            config.admin_directory.connection.timeout_seconds = timeout;
        }
    }
    if let Some(val) = env("ADDRESSBOOK_ADMIN_DIRECTORY_TLS_VERIFY") {
        config.admin_directory.connection.tls_verify = val.parse().unwrap_or(true);
    }

    // Sync overrides
    if let Some(val) = env("ADDRESSBOOK_SYNC_PARALLEL_SOURCES") {
        if let Ok(parallel) = val.parse() {
            config.sync.parallel_sources = parallel;
        }
    }
    if let Some(val) = env("ADDRESSBOOK_SYNC_STATE_DIRECTORY") {
        config.sync.state_directory = val;
    }

    // Logging overrides
    if let Some(val) = env("ADDRESSBOOK_LOGGING_LOCAL_ENABLED") {
        config.logging.local_enabled = val.parse().unwrap_or(false);
    }
    if let Some(val) = env("ADDRESSBOOK_LOGGING_LOCAL_PATH") {
        config.logging.local_path = val;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_substitute_env_vars() {
        std::env::set_var("ADDRESSBOOK_TEST_SUBST_VAR", "test_value");
        let input = "password = \"${ADDRESSBOOK_TEST_SUBST_VAR}\"";
        let result = substitute_env_vars(input).unwrap();
        assert_eq!(result, "password = \"test_value\"");
        std::env::remove_var("ADDRESSBOOK_TEST_SUBST_VAR");
    }

    #[test]
    fn test_substitute_env_vars_missing() {
        std::env::remove_var("ADDRESSBOOK_TEST_MISSING_VAR");
        let input = "password = \"${ADDRESSBOOK_TEST_MISSING_VAR}\"";
        let err = substitute_env_vars(input).unwrap_err();
        assert!(err.to_string().contains("ADDRESSBOOK_TEST_MISSING_VAR"));
    }

    #[test]
    fn test_substitute_env_vars_skips_comments() {
        std::env::remove_var("ADDRESSBOOK_TEST_COMMENTED_VAR");
        let input = "# token = \"${ADDRESSBOOK_TEST_COMMENTED_VAR}\"\nlog_level = \"info\"";
        let result = substitute_env_vars(input).unwrap();
        assert_eq!(result, input);
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config("nonexistent.toml");
        assert!(matches!(result, Err(AddressBookError::Configuration(_))));
    }

    #[test]
    fn test_load_config_valid() {
        let toml_content = r#"
[application]
log_level = "info"

[registry]
base_url = "https://lrza.example.org/fhir"

[query_directory]
base_url = "http://query-directory:8080/fhir"

[sync]
parallel_sources = 2
state_directory = "/tmp/addressbook-state"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.registry.base_url, "https://lrza.example.org/fhir");
        assert_eq!(config.sync.parallel_sources, 2);
        assert_eq!(config.admin_directory.connection.auth_type, "none");
    }
}
