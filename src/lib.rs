// Deid Export - De-identifying export of research imaging data
// Copyright (c) 2025 Deid Export Contributors
// Licensed under the MIT License

//! # Deid Export - de-identifying export of research imaging data
//!
//! Deid Export copies a project, subject or session from one project of a
//! hierarchical datastore into another, de-identifying every selected file
//! on the way and carrying over only allow-listed metadata.
//!
//! ## Overview
//!
//! This library provides the core functionality for:
//! - **Templating** de-identification profiles from per-subject mapping tables
//! - **Filtering** container and file metadata through an allow-list
//! - **Re-parenting** origin containers under a destination project, keyed by
//!   a salted provenance stamp so repeated runs update instead of duplicate
//! - **Exporting** files through a per-file state machine with a CSV report
//!
//! ## Architecture
//!
//! - [`cli`] - Command-line interface and argument parsing
//! - [`core`] - Export state machine, session batches and the container walk
//! - [`profile`] - Profiles, mapping tables and per-subject rendering
//! - [`metadata`] - Allow-list filtering and provenance stamps
//! - [`adapters`] - Datastore, codec and remote job integrations
//! - [`domain`] - Core domain types and errors
//! - [`config`] - Configuration management
//! - [`logging`] - Structured logging
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use deid_export::profile::{MappingTable, MappingValidator, PerSubjectProfileFactory, Profile};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let profile = Profile::from_file("deid_profile.yml")?;
//! let table = MappingTable::from_path("subjects.csv")?;
//! let mapping = MappingValidator::new("subject.code").validate(&profile, table)?;
//!
//! let factory = PerSubjectProfileFactory::new(profile, mapping);
//! let subject_profile = factory.build("001")?;
//! println!("{}", subject_profile.to_yaml_string()?);
//! # Ok(())
//! # }
//! ```
//!
//! See [`core`] for running a full export.
//!
//! ## Error Handling
//!
//! Library functions return [`domain::Result`]. Failures of a single file are
//! recorded on its status row and never abort the rest of the export:
//!
//! ```rust
//! use deid_export::domain::DeidError;
//!
//! let err = DeidError::MissingColumn("subject.code".to_string());
//! assert!(err.to_string().contains("subject.code"));
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod logging;
pub mod metadata;
pub mod profile;
