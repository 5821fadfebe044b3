//! Configuration management.
//!
//! The exporter reads a TOML file with `${VAR}` substitution and `DEID_*`
//! environment overrides.
//!
//! # Example Configuration
//!
//! ```toml
//! [application]
//! log_level = "info"
//!
//! [datastore]
//! base_url = "https://data.example.org/api"
//! api_key = "${DEID_API_KEY}"
//!
//! [datastore.retry]
//! max_attempts = 3
//!
//! [export]
//! overwrite = false
//! max_workers = 0
//!
//! [codec]
//! program = "deid-file"
//! args = ["--profile", "{profile}", "--output-dir", "{output_dir}", "{input}"]
//!
//! [mapping]
//! subject_column = "subject.code"
//! ```

pub mod loader;
pub mod schema;
pub mod secret;

pub use loader::load_config;
pub use schema::{
    ApplicationConfig, CodecConfig, DatastoreConfig, DeidConfig, ExportConfig, JobsConfig,
    LoggingConfig, MappingConfig, RetryConfig,
};
pub use secret::{secret_string, SecretString, SecretValue};
