//! The lineage store: records keyed by `(root_id, node_id)`.
//!
//! Besides point lookups the store keeps two secondary indexes: one on
//! `node_id` alone, to find a node without knowing its tree, and one on
//! `(root_id, action_taken)`, to enumerate nodes of one kind within a tree.
//! Expired records are invisible to every read and are removed by
//! [`LineageStore::purge_expired`].

mod memory;

pub use memory::InMemoryLineageStore;

use async_trait::async_trait;

use crate::core::{ActionTaken, LineageRecord};
use crate::errors::StoreError;

/// Result of an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// No record existed for the key.
    Inserted,
    /// A different record existed and was overwritten.
    Replaced,
    /// An identical record already existed.
    Unchanged,
}

/// Storage backend for lineage records.
///
/// Writes are idempotent upserts: writing the same record twice leaves one
/// record, and the last write for a key wins.
#[async_trait]
pub trait LineageStore: Send + Sync {
    /// Inserts or replaces the record at `(root_id, node_id)`.
    async fn put(&self, record: LineageRecord) -> Result<WriteOutcome, StoreError>;

    /// Point lookup.
    async fn get(&self, root_id: &str, node_id: &str) -> Result<Option<LineageRecord>, StoreError>;

    /// Finds a node in whichever tree holds it.
    async fn find_by_node(&self, node_id: &str) -> Result<Vec<LineageRecord>, StoreError>;

    /// Lists the nodes of one action within one tree, ordered by `node_id`.
    async fn query_by_action(
        &self,
        root_id: &str,
        action: &ActionTaken,
    ) -> Result<Vec<LineageRecord>, StoreError>;

    /// Lists every live node of one tree, ordered by `node_id`.
    async fn query_tree(&self, root_id: &str) -> Result<Vec<LineageRecord>, StoreError>;

    /// Lists every stored node of one tree, expired but not yet purged ones
    /// included, ordered by `node_id`.
    ///
    /// Lets a reader tell an ancestor that expired from one that was never
    /// written.
    async fn query_tree_including_expired(
        &self,
        root_id: &str,
    ) -> Result<Vec<LineageRecord>, StoreError>;

    /// Deletes every record of one tree and returns how many were removed.
    async fn delete_tree(&self, root_id: &str) -> Result<usize, StoreError>;

    /// Removes expired records and returns how many were removed.
    async fn purge_expired(&self) -> Result<usize, StoreError>;
}
