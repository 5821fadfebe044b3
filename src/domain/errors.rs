//! Domain error types
//!
//! This module defines the error hierarchy for the exporter. Errors never
//! expose third-party types; adapters convert HTTP, I/O and parser errors into
//! the variants below before they reach the export pipeline.

use thiserror::Error;

/// Main exporter error type
///
/// Every fallible operation in the library returns this type through
/// [`crate::domain::Result`].
#[derive(Debug, Error)]
pub enum DeidError {
    /// A dotted profile path does not resolve inside the profile
    #[error("Profile path not found: {0}")]
    PathNotFound(String),

    /// A required mapping column is absent from the table header
    #[error("Missing required column: {0}")]
    MissingColumn(String),

    /// The subject identifier column contains repeated values
    #[error("Duplicate values in column `{column}`: {}", .values.join(", "))]
    DuplicateKey { column: String, values: Vec<String> },

    /// No mapping row exists for the requested subject
    #[error("Subject `{0}` not found in mapping table")]
    SubjectNotFound(String),

    /// A field rule carries zero or several actions, or no name
    #[error("Invalid field rule: {0}")]
    InvalidFieldRule(String),

    /// The profile document itself is malformed
    #[error("Invalid profile: {0}")]
    InvalidProfile(String),

    /// The de-identification codec failed or produced no output
    #[error("De-identification failed: {0}")]
    CodecFailure(String),

    /// Two files in one batch resolve to the same destination name
    #[error("Name collision: {0}")]
    NameCollision(String),

    /// A call to the remote datastore failed
    #[error("Remote call failed: {0}")]
    RemoteCallFailure(#[from] DatastoreError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Validation errors that are not tied to a single column or rule
    #[error("Validation error: {0}")]
    Validation(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// Export process errors
    #[error("Export error: {0}")]
    Export(String),
}

/// Remote datastore errors
///
/// Errors raised by [`crate::adapters::datastore::Datastore`] implementations.
/// HTTP client types are converted at the adapter boundary.
#[derive(Debug, Clone, Error)]
pub enum DatastoreError {
    /// Failed to reach the datastore
    #[error("Failed to connect to datastore: {0}")]
    ConnectionFailed(String),

    /// The API key was rejected
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The requested container or file does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Server error (5xx)
    #[error("Server error: {status} - {message}")]
    ServerError { status: u16, message: String },

    /// Client error (4xx)
    #[error("Client error: {status} - {message}")]
    ClientError { status: u16, message: String },

    /// Timeout
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// The response body could not be interpreted
    #[error("Invalid response from datastore: {0}")]
    InvalidResponse(String),
}

impl DatastoreError {
    /// Whether repeating the same call may succeed
    ///
    /// Connection failures, timeouts, 5xx responses and 429 are transient.
    /// Everything else is treated as fatal for the call.
    pub fn is_retryable(&self) -> bool {
        match self {
            DatastoreError::ConnectionFailed(_) | DatastoreError::Timeout(_) => true,
            DatastoreError::ServerError { .. } => true,
            DatastoreError::ClientError { status, .. } => *status == 429,
            DatastoreError::AuthenticationFailed(_)
            | DatastoreError::NotFound(_)
            | DatastoreError::InvalidResponse(_) => false,
        }
    }
}

impl DeidError {
    /// Whether the error came from a transient remote failure
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeidError::RemoteCallFailure(e) if e.is_retryable())
    }

    /// Whether the error is a remote "not found" answer
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DeidError::RemoteCallFailure(DatastoreError::NotFound(_))
        )
    }
}

impl From<std::io::Error> for DeidError {
    fn from(err: std::io::Error) -> Self {
        DeidError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for DeidError {
    fn from(err: serde_json::Error) -> Self {
        DeidError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for DeidError {
    fn from(err: serde_yaml::Error) -> Self {
        DeidError::Serialization(err.to_string())
    }
}

impl From<csv::Error> for DeidError {
    fn from(err: csv::Error) -> Self {
        DeidError::Serialization(format!("CSV: {err}"))
    }
}

impl From<toml::de::Error> for DeidError {
    fn from(err: toml::de::Error) -> Self {
        DeidError::Configuration(format!("TOML parsing error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_key_display() {
        let err = DeidError::DuplicateKey {
            column: "subject.code".to_string(),
            values: vec!["001".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Duplicate values in column `subject.code`: 001"
        );
    }

    #[test]
    fn test_datastore_error_retryable() {
        assert!(DatastoreError::Timeout("slow".to_string()).is_retryable());
        assert!(DatastoreError::ServerError {
            status: 503,
            message: "unavailable".to_string()
        }
        .is_retryable());
        assert!(DatastoreError::ClientError {
            status: 429,
            message: "slow down".to_string()
        }
        .is_retryable());
        assert!(!DatastoreError::ClientError {
            status: 400,
            message: "bad".to_string()
        }
        .is_retryable());
        assert!(!DatastoreError::NotFound("file".to_string()).is_retryable());
    }

    #[test]
    fn test_remote_failure_from_datastore_error() {
        let err: DeidError = DatastoreError::NotFound("abc".to_string()).into();
        assert!(err.is_not_found());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: DeidError = io_err.into();
        assert!(matches!(err, DeidError::Io(_)));
    }
}
