//! Metadata transfer across the de-identification boundary
//!
//! - [`filter`] - per-kind filtering with provenance stamping
//! - [`whitelist`] - allow-lists and export whitelist expansion
//! - [`provenance`] - salted origin stamps
//! - [`dotted`] - dotted-key access into nested mappings

pub mod dotted;
pub mod filter;
pub mod provenance;
pub mod whitelist;

pub use filter::{ContainerMetadataFilter, MetadataView};
pub use provenance::{origin_stamp, ORIGIN_ID_KEY};
pub use whitelist::MetadataPolicy;
