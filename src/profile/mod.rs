//! De-identification profile engine
//!
//! - [`path`] - dotted path parsing and resolution
//! - [`template`] - type-preserving substitution into a profile copy
//! - [`mapping`] - subject mapping tables and their validation
//! - [`subject`] - per-subject profile construction
//! - [`export`] - the profile's `export` block

pub mod export;
pub mod mapping;
pub mod model;
pub mod path;
pub mod subject;
pub mod template;

pub use export::ExportSpec;
pub use mapping::{MappingTable, MappingValidator, ValidatedMapping, DEFAULT_SUBJECT_COLUMN};
pub use model::{Profile, FIELD_ACTIONS};
pub use path::{ProfilePath, Segment};
pub use subject::{PerSubjectProfileFactory, SubjectProfile};
