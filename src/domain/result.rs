//! Result type alias for the exporter

use super::errors::DeidError;

/// Result type alias for exporter operations
///
/// # Examples
///
/// ```
/// use deid_export::domain::result::Result;
/// use deid_export::domain::errors::DeidError;
///
/// fn lookup_subject(code: &str) -> Result<String> {
///     if code.is_empty() {
///         return Err(DeidError::SubjectNotFound(code.to_string()));
///     }
///     Ok(code.to_string())
/// }
/// ```
pub type Result<T> = std::result::Result<T, DeidError>;
