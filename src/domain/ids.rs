//! Domain identifier types with validation

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier system of the URA (UZI register abonnee) number
pub const URA_SYSTEM: &str = "http://fhir.nl/fhir/NamingSystem/ura";

/// URA number of a healthcare organization
///
/// The external identifier the registry uses to decide which Admin Directory
/// is authoritative for an organization.
///
/// # Examples
///
/// ```
/// use addressbook_sync::domain::ids::Ura;
/// use std::str::FromStr;
///
/// let ura = Ura::from_str("12345678").unwrap();
/// assert_eq!(ura.as_str(), "12345678");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Ura(String);

impl Ura {
    /// Creates a new Ura, rejecting blank values
    pub fn new(ura: impl Into<String>) -> Result<Self, String> {
        let ura = ura.into();
        let trimmed = ura.trim();
        if trimmed.is_empty() {
            return Err("URA cannot be empty".to_string());
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Returns the URA as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the `system|value` token used in identifier searches
    pub fn search_token(&self) -> String {
        format!("{URA_SYSTEM}|{}", self.0)
    }

    /// Consumes self and returns the inner String
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Ura {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Ura {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for Ura {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Base URL of an Admin Directory
///
/// Stored without a trailing slash, since it is the prefix of every provenance
/// tag written to the Query Directory and must compare equal to the address the
/// registry publishes.
///
/// # Examples
///
/// ```
/// use addressbook_sync::domain::ids::SourceUrl;
///
/// let source = SourceUrl::new("https://ad.example.org/fhir/").unwrap();
/// assert_eq!(source.as_str(), "https://ad.example.org/fhir");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SourceUrl(String);

impl SourceUrl {
    /// Creates a new SourceUrl
    ///
    /// The value must be an absolute http(s) URL.
    pub fn new(url: impl Into<String>) -> Result<Self, String> {
        let url = url.into();
        let trimmed = url.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            return Err("Source URL cannot be empty".to_string());
        }

        let parsed =
            url::Url::parse(trimmed).map_err(|e| format!("Invalid source URL '{trimmed}': {e}"))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(format!(
                "Source URL must use http or https, got: {trimmed}"
            ));
        }

        Ok(Self(trimmed.to_string()))
    }

    /// Returns the URL as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SourceUrl {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for SourceUrl {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SourceUrl> for String {
    fn from(value: SourceUrl) -> Self {
        value.0
    }
}

impl AsRef<str> for SourceUrl {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
