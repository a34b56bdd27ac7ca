//! In-memory lineage store.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

use super::{LineageStore, WriteOutcome};
use crate::core::{ActionTaken, LineageRecord};
use crate::errors::StoreError;
use crate::utils::{Clock, SystemClock, Timestamp};

type Key = (String, String);

#[derive(Debug, Default)]
struct Tables {
    records: BTreeMap<Key, LineageRecord>,
    by_node: HashMap<String, BTreeSet<String>>,
    by_action: BTreeMap<(String, ActionTaken), BTreeSet<String>>,
}

impl Tables {
    fn index(&mut self, record: &LineageRecord) {
        self.by_node
            .entry(record.node_id.clone())
            .or_default()
            .insert(record.root_id.clone());
        self.by_action
            .entry((record.root_id.clone(), record.action_taken.clone()))
            .or_default()
            .insert(record.node_id.clone());
    }

    fn unindex(&mut self, record: &LineageRecord) {
        if let Some(roots) = self.by_node.get_mut(&record.node_id) {
            roots.remove(&record.root_id);
            if roots.is_empty() {
                self.by_node.remove(&record.node_id);
            }
        }
        let action_key = (record.root_id.clone(), record.action_taken.clone());
        if let Some(nodes) = self.by_action.get_mut(&action_key) {
            nodes.remove(&record.node_id);
            if nodes.is_empty() {
                self.by_action.remove(&action_key);
            }
        }
    }

    fn remove(&mut self, key: &Key) -> Option<LineageRecord> {
        let record = self.records.remove(key)?;
        self.unindex(&record);
        Some(record)
    }

    fn tree_keys(&self, root_id: &str) -> Vec<Key> {
        self.records
            .range((root_id.to_string(), String::new())..)
            .take_while(|((root, _), _)| root == root_id)
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn live(&self, key: &Key, now: Timestamp) -> Option<&LineageRecord> {
        self.records.get(key).filter(|r| !r.is_expired_at(now))
    }
}

/// Lineage store kept in process memory.
///
/// All three key spaces are updated under one lock, so readers never see a
/// record without its index entries.
#[derive(Debug)]
pub struct InMemoryLineageStore {
    tables: RwLock<Tables>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryLineageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLineageStore {
    /// Creates an empty store using the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty store using `clock` to judge expiry.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            clock,
        }
    }

    /// Number of stored records, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.read().records.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.read().records.is_empty()
    }
}

#[async_trait]
impl LineageStore for InMemoryLineageStore {
    async fn put(&self, mut record: LineageRecord) -> Result<WriteOutcome, StoreError> {
        record.action_taken = record.action_taken.normalized();
        let key = record.key();
        let mut tables = self.tables.write();

        let identical = tables.records.get(&key).map(|existing| *existing == record);
        let outcome = match identical {
            Some(true) => return Ok(WriteOutcome::Unchanged),
            Some(false) => {
                tables.remove(&key);
                WriteOutcome::Replaced
            }
            None => WriteOutcome::Inserted,
        };

        tables.index(&record);
        tables.records.insert(key, record);
        Ok(outcome)
    }

    async fn get(&self, root_id: &str, node_id: &str) -> Result<Option<LineageRecord>, StoreError> {
        let now = self.clock.now();
        let key = (root_id.to_string(), node_id.to_string());
        Ok(self.tables.read().live(&key, now).cloned())
    }

    async fn find_by_node(&self, node_id: &str) -> Result<Vec<LineageRecord>, StoreError> {
        let now = self.clock.now();
        let tables = self.tables.read();
        let Some(roots) = tables.by_node.get(node_id) else {
            return Ok(Vec::new());
        };
        Ok(roots
            .iter()
            .filter_map(|root| tables.live(&(root.clone(), node_id.to_string()), now))
            .cloned()
            .collect())
    }

    async fn query_by_action(
        &self,
        root_id: &str,
        action: &ActionTaken,
    ) -> Result<Vec<LineageRecord>, StoreError> {
        let now = self.clock.now();
        let tables = self.tables.read();
        let action = action.clone().normalized();
        let Some(nodes) = tables.by_action.get(&(root_id.to_string(), action)) else {
            return Ok(Vec::new());
        };
        Ok(nodes
            .iter()
            .filter_map(|node| tables.live(&(root_id.to_string(), node.clone()), now))
            .cloned()
            .collect())
    }

    async fn query_tree(&self, root_id: &str) -> Result<Vec<LineageRecord>, StoreError> {
        let now = self.clock.now();
        let tables = self.tables.read();
        Ok(tables
            .records
            .range((root_id.to_string(), String::new())..)
            .take_while(|((root, _), _)| root == root_id)
            .filter(|(_, record)| !record.is_expired_at(now))
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn query_tree_including_expired(
        &self,
        root_id: &str,
    ) -> Result<Vec<LineageRecord>, StoreError> {
        let tables = self.tables.read();
        Ok(tables
            .tree_keys(root_id)
            .iter()
            .filter_map(|key| tables.records.get(key))
            .cloned()
            .collect())
    }

    async fn delete_tree(&self, root_id: &str) -> Result<usize, StoreError> {
        let mut tables = self.tables.write();
        let keys = tables.tree_keys(root_id);
        for key in &keys {
            tables.remove(key);
        }
        debug!(root_id = %root_id, removed = keys.len(), "Deleted tree records");
        Ok(keys.len())
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let mut tables = self.tables.write();
        let expired: Vec<Key> = tables
            .records
            .iter()
            .filter(|(_, record)| record.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            tables.remove(key);
        }
        Ok(expired.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::ManualClock;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    fn ids(records: &[LineageRecord]) -> Vec<&str> {
        records.iter().map(|r| r.node_id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_put_is_idempotent() {
        let store = InMemoryLineageStore::new();
        let record = LineageRecord::new("R", "A", "created");

        assert_eq!(store.put(record.clone()).await.unwrap(), WriteOutcome::Inserted);
        assert_eq!(store.put(record.clone()).await.unwrap(), WriteOutcome::Unchanged);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("R", "A").await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn test_last_write_wins_and_reindexes() {
        let store = InMemoryLineageStore::new();
        store.put(LineageRecord::new("R", "A", "created")).await.unwrap();

        let newer = LineageRecord::new("R", "A", "transformed")
            .with_payload(serde_json::json!({"v": 2}));
        assert_eq!(store.put(newer.clone()).await.unwrap(), WriteOutcome::Replaced);

        assert!(store
            .query_by_action("R", &ActionTaken::Created)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            store.query_by_action("R", &ActionTaken::Transformed).await.unwrap(),
            vec![newer]
        );
    }

    #[tokio::test]
    async fn test_secondary_lookups() {
        let store = InMemoryLineageStore::new();
        store.put(LineageRecord::new("R1", "A", "created")).await.unwrap();
        store.put(LineageRecord::new("R1", "B", "merged").with_parent("A")).await.unwrap();
        store.put(LineageRecord::new("R1", "C", "merged").with_parent("A")).await.unwrap();
        store.put(LineageRecord::new("R2", "X", "created")).await.unwrap();

        let found = store.find_by_node("B").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].root_id, "R1");
        assert!(store.find_by_node("missing").await.unwrap().is_empty());

        let merged = store.query_by_action("R1", &ActionTaken::Merged).await.unwrap();
        assert_eq!(ids(&merged), vec!["B", "C"]);
        assert!(store
            .query_by_action("R2", &ActionTaken::Merged)
            .await
            .unwrap()
            .is_empty());

        assert_eq!(ids(&store.query_tree("R1").await.unwrap()), vec!["A", "B", "C"]);
        assert_eq!(ids(&store.query_tree("R2").await.unwrap()), vec!["X"]);
    }

    #[tokio::test]
    async fn test_known_action_spelled_as_other_is_indexed_by_name() {
        let store = InMemoryLineageStore::new();
        let plain = LineageRecord::new("R", "A", "created");
        let mut record = plain.clone();
        record.action_taken = ActionTaken::Other("Created".to_string());
        store.put(record).await.unwrap();

        let stored = store.get("R", "A").await.unwrap().unwrap();
        assert_eq!(stored.action_taken, ActionTaken::Created);
        assert_eq!(
            ids(&store.query_by_action("R", &ActionTaken::Created).await.unwrap()),
            vec!["A"]
        );
        assert_eq!(
            ids(&store
                .query_by_action("R", &ActionTaken::Other("created".to_string()))
                .await
                .unwrap()),
            vec!["A"]
        );
        assert_eq!(
            store.put(plain).await.unwrap(),
            WriteOutcome::Unchanged
        );
    }

    #[tokio::test]
    async fn test_partition_query_does_not_bleed_into_prefix_roots() {
        let store = InMemoryLineageStore::new();
        store.put(LineageRecord::new("R", "A", "created")).await.unwrap();
        store.put(LineageRecord::new("R1", "B", "created")).await.unwrap();

        assert_eq!(ids(&store.query_tree("R").await.unwrap()), vec!["A"]);
    }

    #[tokio::test]
    async fn test_expired_records_are_invisible_then_purged() {
        let clock = Arc::new(ManualClock::default());
        let store = InMemoryLineageStore::with_clock(clock.clone());
        let expiry = clock.now() + Duration::seconds(10);

        store
            .put(LineageRecord::new("R", "A", "created").with_ttl_expiry(expiry))
            .await
            .unwrap();
        store.put(LineageRecord::new("R", "B", "copied").with_parent("A")).await.unwrap();

        assert!(store.get("R", "A").await.unwrap().is_some());

        clock.advance(Duration::seconds(10));
        assert!(store.get("R", "A").await.unwrap().is_none());
        assert!(store.find_by_node("A").await.unwrap().is_empty());
        assert_eq!(ids(&store.query_tree("R").await.unwrap()), vec!["B"]);
        assert_eq!(
            ids(&store.query_tree_including_expired("R").await.unwrap()),
            vec!["A", "B"]
        );
        assert_eq!(store.len(), 2);

        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.purge_expired().await.unwrap(), 0);
        assert_eq!(
            ids(&store.query_tree_including_expired("R").await.unwrap()),
            vec!["B"]
        );
    }

    #[tokio::test]
    async fn test_delete_tree() {
        let store = InMemoryLineageStore::new();
        store.put(LineageRecord::new("R", "A", "created")).await.unwrap();
        store.put(LineageRecord::new("R", "B", "split").with_parent("A")).await.unwrap();
        store.put(LineageRecord::new("S", "Z", "created")).await.unwrap();

        assert_eq!(store.delete_tree("R").await.unwrap(), 2);
        assert!(store.find_by_node("A").await.unwrap().is_empty());
        assert!(store
            .query_by_action("R", &ActionTaken::Split)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(store.len(), 1);
    }
}
