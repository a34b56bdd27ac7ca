//! # Lineageflow
//!
//! Records data lineage facts and reconstructs lineage trees on demand.
//!
//! Lineageflow provides:
//!
//! - **Ingress**: validates producer facts and publishes them as lineage events
//! - **Durable channels**: at-least-once delivery with a visibility window and
//!   dead-letter diversion
//! - **Lineage store**: idempotent upserts keyed by `(root_id, node_id)` with
//!   secondary indexes and record expiry
//! - **Trace reconstruction**: rebuilds a tree from the store and archives it
//!   exactly once
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use lineageflow::prelude::*;
//! use serde_json::json;
//!
//! let pipeline = LineagePipeline::new(PipelineConfig::default())?;
//! pipeline.start();
//!
//! pipeline.ingest(json!({"node_id": "A", "action_taken": "created"}))?;
//! pipeline.ingest(json!({"node_id": "B", "parent_id": "A", "root_id": "A", "action": "copy"}))?;
//! pipeline.request_retrace("A")?;
//!
//! pipeline.shutdown().await;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod archive;
pub mod cancellation;
pub mod channel;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod ingress;
pub mod observability;
pub mod pipeline;
pub mod retrace;
pub mod store;
pub mod testing;
pub mod utils;
pub mod writer;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::archive::{ArchiveReceipt, ArchiveStore, FsArchive, InMemoryArchive};
    pub use crate::cancellation::ShutdownToken;
    pub use crate::channel::{
        DeadLetter, DeadLetterChannel, Delivery, DurableChannel, RedeliveryBackoff,
    };
    pub use crate::config::{
        ArchiveConfig, ChannelConfig, PipelineConfig, RetraceConfig, StoreConfig,
    };
    pub use crate::core::{
        ActionTaken, LineageEvent, LineageRecord, LineageTree, LineageTreeNode, RetraceRequest,
        RetraceState,
    };
    pub use crate::errors::{
        ArchiveError, ChannelError, ConfigError, LineageError, PublishError, StoreError,
        TraversalError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::ingress::IngressEndpoint;
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::pipeline::{LineagePipeline, LineagePipelineBuilder};
    pub use crate::retrace::{RetraceOutcome, TraceReconstructor, TraversalPolicy};
    pub use crate::store::{InMemoryLineageStore, LineageStore, WriteOutcome};
    pub use crate::utils::{generate_node_id, iso_timestamp, Timestamp};
    pub use crate::writer::{BatchReport, StoreWriter};
}
