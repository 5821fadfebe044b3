//! Core business logic for the exporter.
//!
//! # Modules
//!
//! - [`export`] - Per-file state machine, session batches and the container walk
//! - [`retry`] - Bounded retry of remote calls
//!
//! # Export Workflow
//!
//! 1. **Resolve**: Look up the origin container and the destination project
//! 2. **Walk**: Project → subjects → sessions, choosing a profile per subject
//! 3. **Find or create**: Destination subject, session and acquisitions
//! 4. **Batch**: De-identify, claim names, upload and reconcile each file
//! 5. **Report**: Append status rows to the CSV report and summarize
//!
//! # Example
//!
//! ```rust,no_run
//! use deid_export::adapters::codec::CommandCodec;
//! use deid_export::adapters::datastore::{ApiDatastore, Datastore};
//! use deid_export::config::load_config;
//! use deid_export::core::export::{ContainerExportWalker, ExportContext, ProfileRef};
//! use deid_export::profile::Profile;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("deid-export.toml")?;
//! let store = Arc::new(ApiDatastore::new(&config.datastore, None)?);
//! let codec = Arc::new(CommandCodec::new(&config.codec));
//! let ctx = ExportContext::from_config(store.clone(), codec, &config);
//!
//! let path = Path::new("deid_profile.yml");
//! let profile = Profile::from_file(path)?;
//! let origin = store.lookup("lab/origin/001").await?;
//! let dest = store.lookup("lab/destination").await?;
//!
//! let mut walker = ContainerExportWalker::new(&ctx, ProfileRef::new(&profile, path));
//! let errors = walker.export(&origin.id, &dest).await?;
//! println!("{errors} files failed");
//! # Ok(())
//! # }
//! ```

pub mod export;
pub mod retry;
