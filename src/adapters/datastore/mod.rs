//! Remote container/object store
//!
//! - [`traits`] - the [`Datastore`] trait consumed by the export pipeline
//! - [`query`] - `field=value` query strings
//! - [`client`] - REST implementation
//! - [`memory`] - in-process implementation

pub mod client;
pub mod memory;
pub mod query;
pub mod traits;

pub use client::ApiDatastore;
pub use memory::InMemoryDatastore;
pub use query::{quote_numeric_string, Query, QueryTerm};
pub use traits::{Datastore, DatastoreResult};
