//! Domain error types
//!
//! All errors are domain-specific and don't expose third-party types. Every
//! error is either operational (skip the affected organization or source and
//! carry on) or infrastructural (abort the run), see
//! [`AddressBookError::is_operational`].

use thiserror::Error;

/// Main error type
#[derive(Debug, Error)]
pub enum AddressBookError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// FHIR server errors (Query Directory, registry or a source)
    #[error("FHIR error: {0}")]
    Fhir(#[from] FhirError),

    /// An Admin Directory could not be reached or returned garbage
    #[error("Admin Directory {source_url} unavailable: {message}")]
    SourceUnavailable { source_url: String, message: String },

    /// The registry designates no (or another) source for an organization
    #[error("Not authoritative: {0}")]
    NotAuthoritative(String),

    /// Ownership references in a batch loop back on themselves
    #[error("Cyclic ownership: {0}")]
    CyclicOwnership(String),

    /// Upstream data failed structural validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Cursor state could not be read or written
    #[error("State management error: {0}")]
    State(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// Internal invariant violations
    #[error("{0}")]
    Other(String),
}

/// FHIR REST errors
///
/// Mapped from HTTP status codes and transport failures by the FHIR client.
#[derive(Debug, Error)]
pub enum FhirError {
    /// Failed to connect to the server
    #[error("Failed to connect to FHIR server: {0}")]
    ConnectionFailed(String),

    /// Response could not be interpreted (wrong content type, bad JSON)
    #[error("Invalid response from server: {0}")]
    InvalidResponse(String),

    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Resource deleted (410)
    #[error("Resource gone: {0}")]
    Gone(String),

    /// Version or referential conflict (409, 412)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Server error (5xx)
    #[error("Server error: {status} - {message}")]
    ServerError { status: u16, message: String },

    /// Client error (4xx)
    #[error("Client error: {status} - {message}")]
    ClientError { status: u16, message: String },

    /// Timeout
    #[error("Request timeout: {0}")]
    Timeout(String),
}

impl FhirError {
    /// Whether a retry could plausibly succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FhirError::ConnectionFailed(_) | FhirError::Timeout(_) | FhirError::ServerError { .. }
        )
    }

    /// Whether the server answered with a client-side rejection
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            FhirError::NotFound(_)
                | FhirError::Gone(_)
                | FhirError::Conflict(_)
                | FhirError::ClientError { .. }
        )
    }
}

impl AddressBookError {
    /// Operational errors skip one unit of work; everything else aborts the run.
    pub fn is_operational(&self) -> bool {
        match self {
            AddressBookError::Fhir(e) => e.is_rejection(),
            AddressBookError::SourceUnavailable { .. }
            | AddressBookError::NotAuthoritative(_)
            | AddressBookError::CyclicOwnership(_)
            | AddressBookError::Validation(_) => true,
            _ => false,
        }
    }

    /// Whether the error means the requested resource does not exist (anymore)
    pub fn is_missing(&self) -> bool {
        matches!(
            self,
            AddressBookError::Fhir(FhirError::NotFound(_)) | AddressBookError::Fhir(FhirError::Gone(_))
        )
    }

    /// Wraps a failure talking to an Admin Directory.
    ///
    /// Rejections (4xx) stay as they are; transport failures, server errors and
    /// unreadable responses become [`AddressBookError::SourceUnavailable`] so that
    /// a misbehaving source never aborts the whole run.
    pub fn from_source(source_url: &str, err: AddressBookError) -> Self {
        match err {
            AddressBookError::Fhir(e) if e.is_rejection() => AddressBookError::Fhir(e),
            AddressBookError::Fhir(e) => AddressBookError::SourceUnavailable {
                source_url: source_url.to_string(),
                message: e.to_string(),
            },
            AddressBookError::Serialization(message) => AddressBookError::SourceUnavailable {
                source_url: source_url.to_string(),
                message,
            },
            other => other,
        }
    }
}

impl From<std::io::Error> for AddressBookError {
    fn from(err: std::io::Error) -> Self {
        AddressBookError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AddressBookError {
    fn from(err: serde_json::Error) -> Self {
        AddressBookError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for AddressBookError {
    fn from(err: toml::de::Error) -> Self {
        AddressBookError::Configuration(format!("TOML parse error: {err}"))
    }
}
