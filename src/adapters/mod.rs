//! External system integrations.
//!
//! - [`datastore`] - the remote container/object store (REST and in-memory)
//! - [`codec`] - the de-identification program applied to each file
//! - [`jobs`] - remote de-identification jobs
//! - [`http`] - shared REST client plumbing
//!
//! # Design Pattern
//!
//! Adapters isolate external dependencies behind traits so the export
//! pipeline can run against in-memory implementations in tests.
//!
//! ```rust,no_run
//! use deid_export::adapters::datastore::{ApiDatastore, Datastore};
//! use deid_export::config::{DatastoreConfig, RetryConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DatastoreConfig {
//!     base_url: "https://data.example.org/api".to_string(),
//!     api_key: None,
//!     timeout_seconds: 60,
//!     tls_verify: true,
//!     retry: RetryConfig::default(),
//! };
//!
//! let store = ApiDatastore::new(&config, None)?;
//! let project = store.lookup("lab/study").await?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod datastore;
pub mod http;
pub mod jobs;
