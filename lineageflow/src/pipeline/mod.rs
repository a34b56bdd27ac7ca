//! Pipeline assembly and background workers.
//!
//! This module provides:
//! - A builder that wires channels, store, archive and workers from config
//! - The running pipeline with ingestion, retrace triggers and shutdown
//! - Synchronous draining helpers for tests and batch jobs

mod builder;
mod runtime;

pub use builder::LineagePipelineBuilder;
pub use runtime::{DrainReport, LineagePipeline};
