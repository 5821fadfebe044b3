//! Export orchestration
//!
//! This module provides the export pipeline, including:
//! - The per-file state machine ([`FileExportUnit`])
//! - Find-or-create of destination containers
//! - Session batches and the hierarchical walk
//! - Remote de-identification jobs
//! - Status reporting and the run summary

pub mod context;
pub mod hierarchy;
pub mod job;
pub mod session;
pub mod status;
pub mod summary;
pub mod unit;
pub mod walker;

pub use context::{ExportContext, ProfileRef, RemoteExecution};
pub use job::{DeidJob, JobState};
pub use session::SessionExportOrchestrator;
pub use status::{ExportState, ExportStatusRecord, ReportWriter};
pub use summary::ExportSummary;
pub use unit::{FileExportUnit, RemoteJobSpec};
pub use walker::ContainerExportWalker;
