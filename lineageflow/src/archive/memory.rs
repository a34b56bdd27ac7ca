//! In-memory archive.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{archive_key, checksum, decode, encode, ArchiveReceipt, ArchiveStore};
use crate::core::LineageTree;
use crate::errors::ArchiveError;

/// Archive holding serialized trees in a concurrent map.
#[derive(Debug, Default)]
pub struct InMemoryArchive {
    objects: DashMap<String, Vec<u8>>,
}

impl InMemoryArchive {
    /// Creates an empty archive.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of archived trees.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns true if nothing is archived.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl ArchiveStore for InMemoryArchive {
    async fn put_if_absent(&self, tree: &LineageTree) -> Result<ArchiveReceipt, ArchiveError> {
        let key = archive_key(&tree.root_id);
        let bytes = encode(tree)?;

        match self.objects.entry(tree.root_id.clone()) {
            Entry::Occupied(existing) => Ok(ArchiveReceipt {
                key,
                checksum: checksum(existing.get()),
                bytes: existing.get().len(),
                newly_written: false,
            }),
            Entry::Vacant(slot) => {
                let receipt = ArchiveReceipt {
                    key,
                    checksum: checksum(&bytes),
                    bytes: bytes.len(),
                    newly_written: true,
                };
                slot.insert(bytes);
                Ok(receipt)
            }
        }
    }

    async fn get(&self, root_id: &str) -> Result<Option<LineageTree>, ArchiveError> {
        self.objects
            .get(root_id)
            .map(|bytes| decode(&archive_key(root_id), bytes.value()))
            .transpose()
    }

    async fn list(&self) -> Result<Vec<String>, ArchiveError> {
        let mut roots: Vec<String> = self.objects.iter().map(|e| e.key().clone()).collect();
        roots.sort();
        Ok(roots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::LineageRecord;

    #[tokio::test]
    async fn test_write_once() {
        let archive = InMemoryArchive::new();
        let first = LineageTree::assemble("R", &[LineageRecord::new("R", "A", "created")]);
        let second = LineageTree::assemble(
            "R",
            &[
                LineageRecord::new("R", "A", "created"),
                LineageRecord::new("R", "B", "copied").with_parent("A"),
            ],
        );

        let receipt = archive.put_if_absent(&first).await.unwrap();
        assert!(receipt.newly_written);
        assert_eq!(receipt.key, "R.json");

        let again = archive.put_if_absent(&second).await.unwrap();
        assert!(!again.newly_written);
        assert_eq!(again.checksum, receipt.checksum);

        assert_eq!(archive.get("R").await.unwrap(), Some(first));
        assert_eq!(archive.list().await.unwrap(), vec!["R"]);
        assert!(archive.get("S").await.unwrap().is_none());
    }
}
