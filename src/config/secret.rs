//! Credential handling using the secrecy crate
//!
//! Passwords and bearer tokens for the registry, the Query Directory and the
//! Admin Directories are held as [`SecretString`]: zeroed on drop, redacted in
//! `Debug` output, and only readable through `expose_secret()`.
//!
//! # Example
//!
//! ```rust
//! use addressbook_sync::config::secret_string;
//! use secrecy::ExposeSecret;
//!
//! let token = secret_string("t0k3n".to_string());
//! assert_eq!(token.expose_secret(), "t0k3n");
//! assert!(!format!("{token:?}").contains("t0k3n"));
//! ```

use base64::{engine::general_purpose, Engine as _};
use secrecy::{CloneableSecret, DebugSecret, ExposeSecret, Secret, SerializableSecret};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::Zeroize;

/// String wrapper implementing the traits `Secret` needs
#[derive(Clone, Debug, Zeroize)]
#[zeroize(drop)]
pub struct SecretValue(String);

impl CloneableSecret for SecretValue {}
impl DebugSecret for SecretValue {}
impl SerializableSecret for SecretValue {}

impl From<String> for SecretValue {
    fn from(s: String) -> Self {
        SecretValue(s)
    }
}

impl PartialEq<str> for SecretValue {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl AsRef<str> for SecretValue {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl SecretValue {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for SecretValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SecretValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(SecretValue)
    }
}

/// A secret string: zeroed on drop, redacted in Debug output
pub type SecretString = Secret<SecretValue>;

/// Wraps a plain string as a [`SecretString`]
#[inline]
pub fn secret_string(value: String) -> SecretString {
    Secret::new(SecretValue::from(value))
}

/// `Authorization` header value for HTTP basic authentication
pub fn basic_authorization(username: &str, password: &SecretString) -> SecretString {
    let password: &str = password.expose_secret().as_ref();
    let credentials = format!("{username}:{password}");
    let encoded = general_purpose::STANDARD.encode(credentials.as_bytes());
    secret_string(format!("Basic {encoded}"))
}

/// `Authorization` header value for bearer authentication
pub fn bearer_authorization(token: &SecretString) -> SecretString {
    let token: &str = token.expose_secret().as_ref();
    secret_string(format!("Bearer {token}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_string_creation() {
        let secret = secret_string("test-password".to_string());
        assert_eq!(secret.expose_secret(), "test-password");
    }

    #[test]
    fn test_secret_debug_redacted() {
        let secret = secret_string("sensitive-data".to_string());
        let debug_output = format!("{secret:?}");
        assert!(!debug_output.contains("sensitive-data"));
    }

    #[test]
    fn test_basic_authorization() {
        let password = secret_string("pass".to_string());
        let header = basic_authorization("sync", &password);
        // base64("sync:pass")
        assert_eq!(header.expose_secret(), "Basic c3luYzpwYXNz");
    }

    #[test]
    fn test_bearer_authorization() {
        let token = secret_string("abc".to_string());
        assert_eq!(bearer_authorization(&token).expose_secret(), "Bearer abc");
    }

    #[test]
    fn test_secret_deserializes_from_toml() {
        #[derive(Deserialize)]
        struct Section {
            token: SecretString,
        }

        let section: Section = toml::from_str("token = \"t0k3n\"").unwrap();
        assert_eq!(section.token.expose_secret(), "t0k3n");
    }
}
