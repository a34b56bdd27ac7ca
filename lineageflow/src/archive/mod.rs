//! Cold storage for reconstructed lineage trees.
//!
//! Archives are write-once and keyed by `root_id`: once a tree is stored,
//! later writes for the same root leave it untouched.

mod fs;
mod memory;

pub use fs::FsArchive;
pub use memory::InMemoryArchive;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::core::LineageTree;
use crate::errors::ArchiveError;

/// Describes a stored archive object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveReceipt {
    /// Object key.
    pub key: String,
    /// Hex SHA-256 of the stored bytes.
    pub checksum: String,
    /// Size of the stored object.
    pub bytes: usize,
    /// False if an object already existed and was kept.
    pub newly_written: bool,
}

/// Write-once storage for lineage trees.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// Stores `tree` unless an object for its root already exists.
    async fn put_if_absent(&self, tree: &LineageTree) -> Result<ArchiveReceipt, ArchiveError>;

    /// Loads the archived tree for `root_id`.
    async fn get(&self, root_id: &str) -> Result<Option<LineageTree>, ArchiveError>;

    /// Lists archived root ids, sorted.
    async fn list(&self) -> Result<Vec<String>, ArchiveError>;
}

/// Object key of a tree.
#[must_use]
pub fn archive_key(root_id: &str) -> String {
    format!("{root_id}.json")
}

pub(crate) fn encode(tree: &LineageTree) -> Result<Vec<u8>, ArchiveError> {
    serde_json::to_vec_pretty(tree).map_err(|e| ArchiveError::Serialization {
        key: archive_key(&tree.root_id),
        reason: e.to_string(),
    })
}

pub(crate) fn decode(key: &str, bytes: &[u8]) -> Result<LineageTree, ArchiveError> {
    serde_json::from_slice(bytes).map_err(|e| ArchiveError::Serialization {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

pub(crate) fn checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::LineageRecord;

    #[test]
    fn test_encode_decode() {
        let tree = LineageTree::assemble("R", &[LineageRecord::new("R", "A", "created")]);
        let bytes = encode(&tree).unwrap();
        assert_eq!(decode("R.json", &bytes).unwrap(), tree);
        assert_eq!(checksum(&bytes).len(), 64);
    }

    #[test]
    fn test_decode_garbage() {
        let err = decode("R.json", b"not json").unwrap_err();
        assert!(matches!(err, ArchiveError::Serialization { .. }));
    }
}
