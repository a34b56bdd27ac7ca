//! Testing utilities for lineage pipelines.
//!
//! This module provides:
//! - A fault-injecting store wrapper
//! - Fixtures for facts, events and record chains
//! - Assertions on reconstructed trees

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{assert_each_node_once, assert_tree_edges};
pub use fixtures::{chain_events, chain_records, fact, wide_tree_records};
pub use mocks::FlakyLineageStore;
