//! The trace reconstructor: rebuilds lineage trees and archives them.
//!
//! A retrace request is processed under a processing timeout. A failed or
//! timed-out attempt is handed back to the retrace channel with a backoff
//! delay; the channel's receive count is the only retry state. Once the
//! attempt budget is spent the request lands in the dead-letter channel.

mod outcome;
mod policy;

pub use outcome::RetraceOutcome;
pub use policy::TraversalPolicy;

use futures::future::join_all;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn, Instrument};

use crate::archive::{ArchiveReceipt, ArchiveStore};
use crate::cancellation::ShutdownToken;
use crate::channel::{Delivery, DurableChannel, Redelivery, RedeliveryBackoff};
use crate::config::RetraceConfig;
use crate::core::{LineageRecord, LineageTree, RetraceRequest, RetraceState};
use crate::errors::{LineageError, TraversalError};
use crate::events::{event_types, EventSink, NoOpEventSink};
use crate::observability::retrace_span;
use crate::store::LineageStore;
use crate::utils::now_utc;

/// Consumes retrace requests, reconstructs trees and archives them.
pub struct TraceReconstructor {
    channel: Arc<DurableChannel<RetraceRequest>>,
    store: Arc<dyn LineageStore>,
    archive: Arc<dyn ArchiveStore>,
    policy: TraversalPolicy,
    processing_timeout: Duration,
    purge_after_archive: bool,
    backoff: RedeliveryBackoff,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for TraceReconstructor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceReconstructor")
            .field("channel", &self.channel.name())
            .field("policy", &self.policy)
            .field("processing_timeout", &self.processing_timeout)
            .field("purge_after_archive", &self.purge_after_archive)
            .finish_non_exhaustive()
    }
}

impl TraceReconstructor {
    /// Creates a reconstructor using the settings in `config`.
    #[must_use]
    pub fn new(
        channel: Arc<DurableChannel<RetraceRequest>>,
        store: Arc<dyn LineageStore>,
        archive: Arc<dyn ArchiveStore>,
        config: &RetraceConfig,
    ) -> Self {
        Self {
            channel,
            store,
            archive,
            policy: TraversalPolicy::from_actions(config.traverse_actions.as_deref()),
            processing_timeout: config.processing_timeout(),
            purge_after_archive: config.purge_after_archive,
            backoff: config.redelivery.clone(),
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    /// Replaces the traversal policy.
    #[must_use]
    pub fn with_policy(mut self, policy: TraversalPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The traversal policy in use.
    #[must_use]
    pub fn policy(&self) -> &TraversalPolicy {
        &self.policy
    }

    /// Rebuilds the tree `root_id` from the store.
    ///
    /// Fails with [`TraversalError::Incomplete`] if the tree has no visible
    /// top-level node, fewer than `expected_nodes` nodes, or a node whose
    /// parent was never written. Nodes cut off by an expired ancestor, or by
    /// one the policy skips, are reported as orphans and mark the tree
    /// truncated.
    pub async fn reconstruct(
        &self,
        root_id: &str,
        expected_nodes: Option<usize>,
    ) -> Result<LineageTree, LineageError> {
        let records = self.load(root_id).await?;
        if !records.iter().any(LineageRecord::is_top_level) {
            return Err(TraversalError::incomplete(root_id, "no top-level node visible").into());
        }

        let tree = LineageTree::assemble(root_id, &records);
        if let Some(expected) = expected_nodes {
            if tree.node_count < expected {
                return Err(TraversalError::incomplete(
                    root_id,
                    format!("found {} of {expected} expected nodes", tree.node_count),
                )
                .into());
            }
        }
        if tree.truncated {
            self.ensure_parents_recorded(root_id, &records, &tree).await?;
            debug!(
                root_id = %root_id,
                orphans = tree.orphans.len(),
                "Reconstructed truncated tree"
            );
        }
        Ok(tree)
    }

    /// Rebuilds every tree that contains `node_id`.
    pub async fn reconstruct_for_node(&self, node_id: &str) -> Result<Vec<LineageTree>, LineageError> {
        let found = self.store.find_by_node(node_id).await?;
        if found.is_empty() {
            return Err(TraversalError::incomplete(node_id, "no live record for node").into());
        }
        let mut trees = Vec::with_capacity(found.len());
        for record in found {
            trees.push(self.reconstruct(&record.root_id, None).await?);
        }
        Ok(trees)
    }

    /// A parent that is absent even among expired records has not landed
    /// yet. Archiving now would freeze the partial tree.
    async fn ensure_parents_recorded(
        &self,
        root_id: &str,
        records: &[LineageRecord],
        tree: &LineageTree,
    ) -> Result<(), LineageError> {
        let loaded: HashSet<&str> = records.iter().map(|r| r.node_id.as_str()).collect();
        let dangling: Vec<(&str, &str)> = records
            .iter()
            .filter(|r| tree.orphans.contains(&r.node_id))
            .filter_map(|r| {
                r.parent_id
                    .as_deref()
                    .filter(|parent| !loaded.contains(parent))
                    .map(|parent| (r.node_id.as_str(), parent))
            })
            .collect();
        if dangling.is_empty() {
            return Ok(());
        }

        let stored = self.store.query_tree_including_expired(root_id).await?;
        let known: HashSet<&str> = stored.iter().map(|r| r.node_id.as_str()).collect();
        match dangling.iter().find(|(_, parent)| !known.contains(parent)) {
            Some((child, parent)) => Err(TraversalError::incomplete(
                root_id,
                format!("parent '{parent}' of node '{child}' not recorded yet"),
            )
            .into()),
            None => Ok(()),
        }
    }

    async fn load(&self, root_id: &str) -> Result<Vec<LineageRecord>, LineageError> {
        match &self.policy {
            TraversalPolicy::All => Ok(self.store.query_tree(root_id).await?),
            TraversalPolicy::Only(actions) => {
                let queries = actions
                    .iter()
                    .map(|action| self.store.query_by_action(root_id, action));
                let mut records = Vec::new();
                for result in join_all(queries).await {
                    records.extend(result?);
                }
                Ok(records)
            }
        }
    }

    /// Reconstructs, archives and optionally purges one tree.
    pub async fn retrace(&self, request: &RetraceRequest) -> Result<(LineageTree, ArchiveReceipt), LineageError> {
        let mut tree = self
            .reconstruct(&request.root_id, request.expected_nodes)
            .await?;
        tree.archived_at = Some(now_utc());
        let receipt = self.archive.put_if_absent(&tree).await?;

        if !receipt.newly_written {
            debug!(root_id = %request.root_id, key = %receipt.key, "Tree was already archived");
        }
        if self.purge_after_archive {
            match self.store.delete_tree(&request.root_id).await {
                Ok(removed) => debug!(root_id = %request.root_id, removed, "Purged archived tree"),
                Err(err) => warn!(
                    root_id = %request.root_id,
                    error = %err,
                    "Archived tree but could not purge its records"
                ),
            }
        }
        Ok((tree, receipt))
    }

    /// Runs the state machine for one delivery and settles it with the
    /// channel.
    pub async fn handle(&self, delivery: Delivery<RetraceRequest>) -> RetraceOutcome {
        let request = &delivery.body;
        let entry = if delivery.is_redelivery() {
            RetraceState::Retrying
        } else {
            RetraceState::Received
        };
        let mut outcome =
            RetraceOutcome::new(&request.request_id, &request.root_id, delivery.receive_count, entry);
        let span = retrace_span(&request.request_id, &request.root_id, delivery.receive_count);

        self.transition(&mut outcome, RetraceState::Traversing);
        let attempt = tokio::time::timeout(self.processing_timeout, self.retrace(request))
            .instrument(span)
            .await
            .unwrap_or_else(|_| {
                Err(TraversalError::Timeout {
                    root_id: request.root_id.clone(),
                    timeout_ms: u64::try_from(self.processing_timeout.as_millis()).unwrap_or(u64::MAX),
                }
                .into())
            });

        match attempt {
            Ok((tree, receipt)) => {
                if let Err(err) = self.channel.ack(&delivery.receipt) {
                    warn!(request_id = %request.request_id, error = %err, "Could not acknowledge retrace");
                }
                outcome.node_count = Some(tree.node_count);
                self.transition(&mut outcome, RetraceState::Archived);
                info!(
                    root_id = %request.root_id,
                    nodes = tree.node_count,
                    truncated = tree.truncated,
                    key = %receipt.key,
                    "Archived lineage tree"
                );
                self.events.try_emit(
                    event_types::RETRACE_ARCHIVED,
                    Some(json!({
                        "request_id": request.request_id,
                        "root_id": request.root_id,
                        "node_count": tree.node_count,
                        "truncated": tree.truncated,
                        "key": receipt.key,
                        "checksum": receipt.checksum,
                        "newly_written": receipt.newly_written,
                    })),
                );
            }
            Err(err) => {
                outcome.error = Some(err.to_string());
                let delay = self.backoff.delay_for(delivery.receive_count);
                warn!(
                    root_id = %request.root_id,
                    attempt = delivery.receive_count,
                    error = %err,
                    "Retrace attempt failed"
                );
                let next = match self.channel.nack(&delivery.receipt, delay, err.to_string()) {
                    Ok(Redelivery::DeadLettered) => RetraceState::DeadLettered,
                    Ok(Redelivery::Scheduled(_)) => RetraceState::Retrying,
                    Err(nack_err) => {
                        // The channel redelivers on its own once the
                        // visibility window lapses.
                        warn!(request_id = %request.request_id, error = %nack_err, "Could not return retrace");
                        RetraceState::Retrying
                    }
                };
                self.transition(&mut outcome, next);
                if next == RetraceState::DeadLettered {
                    self.events.try_emit(
                        event_types::RETRACE_DEAD_LETTERED,
                        Some(json!({
                            "request_id": request.request_id,
                            "root_id": request.root_id,
                            "attempts": delivery.receive_count,
                            "error": err.to_dict(),
                        })),
                    );
                }
            }
        }
        outcome
    }

    fn transition(&self, outcome: &mut RetraceOutcome, next: RetraceState) {
        let from = outcome.final_state();
        debug_assert!(from.can_transition_to(next), "illegal transition {from} -> {next}");
        outcome.transitions.push(next);
        debug!(request_id = %outcome.request_id, from = %from, to = %next, "Retrace state changed");
        self.events.try_emit(
            event_types::RETRACE_STATE_CHANGED,
            Some(json!({
                "request_id": outcome.request_id,
                "root_id": outcome.root_id,
                "from": from,
                "to": next,
                "attempt": outcome.attempt,
            })),
        );
    }

    /// Receives one batch and handles each request.
    pub async fn run_once(&self) -> Vec<RetraceOutcome> {
        let batch = self.channel.receive_batch().await;
        join_all(batch.into_iter().map(|delivery| self.handle(delivery))).await
    }

    /// Runs until `shutdown` is triggered. Requests in progress are finished.
    pub async fn run(&self, shutdown: ShutdownToken) {
        info!(channel = %self.channel.name(), "Trace reconstructor started");
        while !shutdown.is_shutdown() {
            tokio::select! {
                () = shutdown.cancelled() => break,
                batch = self.channel.next_batch() => {
                    join_all(batch.into_iter().map(|delivery| self.handle(delivery))).await;
                }
            }
        }
        info!(channel = %self.channel.name(), "Trace reconstructor stopped");
    }
}
