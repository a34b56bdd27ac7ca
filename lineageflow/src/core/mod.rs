//! Core data model for lineage recording and retracement.

mod action;
mod event;
mod record;
mod status;
mod tree;

pub use action::ActionTaken;
pub use event::{LineageEvent, RetraceRequest};
pub use record::LineageRecord;
pub use status::RetraceState;
pub use tree::{LineageTree, LineageTreeNode};
