//! Domain models and types.
//!
//! # Overview
//!
//! The domain layer provides:
//! - **Identifiers** ([`ContainerId`], [`JobId`])
//! - **Container hierarchy snapshots** ([`Container`], [`FileEntry`])
//! - **Error types** ([`DeidError`], [`DatastoreError`])
//! - **Result type alias** ([`Result`])
//!
//! # Error Handling
//!
//! ```rust
//! use deid_export::domain::{DeidError, Result};
//!
//! fn require_column(header: &[&str], column: &str) -> Result<()> {
//!     if !header.contains(&column) {
//!         return Err(DeidError::MissingColumn(column.to_string()));
//!     }
//!     Ok(())
//! }
//! ```

pub mod container;
pub mod errors;
pub mod ids;
pub mod result;

pub use container::{
    Container, ContainerKind, ContainerParents, ContainerRef, FileEntry, MetadataSource,
};
pub use errors::{DatastoreError, DeidError};
pub use ids::{ContainerId, JobId};
pub use result::Result;
