//! Logging and observability
//!
//! Structured logging via `tracing`, with an optional rotating JSON log file.
//!
//! # Example
//!
//! ```no_run
//! use deid_export::logging::init_logging;
//! use deid_export::config::LoggingConfig;
//!
//! let config = LoggingConfig::default();
//! let _guard = init_logging("info", &config).expect("Failed to initialize logging");
//!
//! tracing::info!("Export started");
//! ```

pub mod structured;

pub use structured::{init_logging, parse_log_level, LoggingGuard};

/// Log a retry attempt
///
/// # Example
///
/// ```no_run
/// use deid_export::log_retry_attempt;
///
/// log_retry_attempt!(2, 3, "upload_file", "Connection timeout");
/// ```
#[macro_export]
macro_rules! log_retry_attempt {
    ($attempt:expr, $max_attempts:expr, $operation:expr, $reason:expr) => {
        tracing::warn!(
            attempt = $attempt,
            max_attempts = $max_attempts,
            operation = $operation,
            reason = %$reason,
            "Retrying operation"
        );
    };
}

/// Log a file unit moving between export states
///
/// # Example
///
/// ```no_run
/// use deid_export::log_unit_transition;
///
/// log_unit_transition!("file-1", "scan.dcm", "Processing", "Processed");
/// ```
#[macro_export]
macro_rules! log_unit_transition {
    ($origin_id:expr, $filename:expr, $from:expr, $to:expr) => {
        tracing::debug!(
            origin_id = %$origin_id,
            filename = %$filename,
            from = %$from,
            to = %$to,
            "File export state changed"
        );
    };
}

/// Log an error with context
///
/// # Example
///
/// ```no_run
/// use deid_export::log_error_with_context;
/// use deid_export::domain::DeidError;
///
/// let error = DeidError::Configuration("Invalid config".to_string());
/// log_error_with_context!(&error, "Failed to load configuration");
/// ```
#[macro_export]
macro_rules! log_error_with_context {
    ($error:expr, $context:expr) => {
        tracing::error!(
            error = %$error,
            context = $context,
            "Error occurred"
        );
    };
}
