//! Fault-injecting store wrapper.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::core::{ActionTaken, LineageRecord};
use crate::errors::StoreError;
use crate::store::{LineageStore, WriteOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Failures {
    Never,
    Next(usize),
    Always,
}

impl Failures {
    fn trip(&mut self) -> bool {
        match self {
            Self::Never | Self::Next(0) => false,
            Self::Always => true,
            Self::Next(n) => {
                *n -= 1;
                true
            }
        }
    }
}

/// Wraps a store and fails reads or writes on demand.
///
/// Failures are reported as transient store errors, exactly as a real
/// backend outage would be.
pub struct FlakyLineageStore {
    inner: Arc<dyn LineageStore>,
    reads: Mutex<Failures>,
    writes: Mutex<Failures>,
    node_writes: Mutex<HashMap<String, usize>>,
    read_delay: Option<Duration>,
    read_calls: AtomicUsize,
    write_calls: AtomicUsize,
}

impl std::fmt::Debug for FlakyLineageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlakyLineageStore")
            .field("reads", &*self.reads.lock())
            .field("writes", &*self.writes.lock())
            .field("read_delay", &self.read_delay)
            .finish_non_exhaustive()
    }
}

impl FlakyLineageStore {
    /// Wraps `inner` without injecting any failure.
    #[must_use]
    pub fn new(inner: Arc<dyn LineageStore>) -> Self {
        Self {
            inner,
            reads: Mutex::new(Failures::Never),
            writes: Mutex::new(Failures::Never),
            node_writes: Mutex::new(HashMap::new()),
            read_delay: None,
            read_calls: AtomicUsize::new(0),
            write_calls: AtomicUsize::new(0),
        }
    }

    /// Fails the next `times` reads.
    #[must_use]
    pub fn fail_reads(self, times: usize) -> Self {
        *self.reads.lock() = Failures::Next(times);
        self
    }

    /// Fails every read.
    #[must_use]
    pub fn fail_all_reads(self) -> Self {
        *self.reads.lock() = Failures::Always;
        self
    }

    /// Fails the next `times` writes.
    #[must_use]
    pub fn fail_writes(self, times: usize) -> Self {
        *self.writes.lock() = Failures::Next(times);
        self
    }

    /// Fails every write.
    #[must_use]
    pub fn fail_all_writes(self) -> Self {
        *self.writes.lock() = Failures::Always;
        self
    }

    /// Fails the next `times` writes of one node.
    #[must_use]
    pub fn fail_writes_for_node(self, node_id: impl Into<String>, times: usize) -> Self {
        self.node_writes.lock().insert(node_id.into(), times);
        self
    }

    /// Delays every read by `delay`.
    #[must_use]
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    /// Stops injecting failures.
    pub fn heal(&self) {
        *self.reads.lock() = Failures::Never;
        *self.writes.lock() = Failures::Never;
        self.node_writes.lock().clear();
    }

    /// Number of read calls seen.
    #[must_use]
    pub fn read_calls(&self) -> usize {
        self.read_calls.load(Ordering::SeqCst)
    }

    /// Number of write calls seen.
    #[must_use]
    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    async fn before_read(&self, operation: &str) -> Result<(), StoreError> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.read_delay {
            tokio::time::sleep(delay).await;
        }
        if self.reads.lock().trip() {
            return Err(StoreError::transient(operation, "injected read failure"));
        }
        Ok(())
    }

    fn before_write(&self, node_id: &str) -> Result<(), StoreError> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        let node_failure = match self.node_writes.lock().get_mut(node_id) {
            Some(left) if *left > 0 => {
                *left -= 1;
                true
            }
            _ => false,
        };
        if node_failure || self.writes.lock().trip() {
            return Err(StoreError::transient("put", "injected write failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl LineageStore for FlakyLineageStore {
    async fn put(&self, record: LineageRecord) -> Result<WriteOutcome, StoreError> {
        self.before_write(&record.node_id)?;
        self.inner.put(record).await
    }

    async fn get(&self, root_id: &str, node_id: &str) -> Result<Option<LineageRecord>, StoreError> {
        self.before_read("get").await?;
        self.inner.get(root_id, node_id).await
    }

    async fn find_by_node(&self, node_id: &str) -> Result<Vec<LineageRecord>, StoreError> {
        self.before_read("find_by_node").await?;
        self.inner.find_by_node(node_id).await
    }

    async fn query_by_action(
        &self,
        root_id: &str,
        action: &ActionTaken,
    ) -> Result<Vec<LineageRecord>, StoreError> {
        self.before_read("query_by_action").await?;
        self.inner.query_by_action(root_id, action).await
    }

    async fn query_tree(&self, root_id: &str) -> Result<Vec<LineageRecord>, StoreError> {
        self.before_read("query_tree").await?;
        self.inner.query_tree(root_id).await
    }

    async fn query_tree_including_expired(
        &self,
        root_id: &str,
    ) -> Result<Vec<LineageRecord>, StoreError> {
        self.before_read("query_tree_including_expired").await?;
        self.inner.query_tree_including_expired(root_id).await
    }

    async fn delete_tree(&self, root_id: &str) -> Result<usize, StoreError> {
        self.inner.delete_tree(root_id).await
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        self.inner.purge_expired().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryLineageStore;

    #[tokio::test]
    async fn test_fails_then_recovers() {
        let store = FlakyLineageStore::new(Arc::new(InMemoryLineageStore::new())).fail_writes(1);
        let record = LineageRecord::new("R", "A", "created");

        assert!(store.put(record.clone()).await.is_err());
        assert_eq!(store.put(record).await.unwrap(), WriteOutcome::Inserted);
        assert_eq!(store.write_calls(), 2);
    }

    #[tokio::test]
    async fn test_read_failures_and_heal() {
        let store =
            FlakyLineageStore::new(Arc::new(InMemoryLineageStore::new())).fail_all_reads();

        assert!(store.query_tree("R").await.is_err());
        assert!(store.get("R", "A").await.is_err());
        store.heal();
        assert!(store.query_tree("R").await.unwrap().is_empty());
        assert_eq!(store.read_calls(), 3);
    }
}
