//! The reconstructed lineage tree written to the archive.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use super::{ActionTaken, LineageRecord};
use crate::utils::Timestamp;

/// One node of a reconstructed tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageTreeNode {
    /// Identifier of this node.
    pub node_id: String,
    /// Transformation classification.
    pub action_taken: ActionTaken,
    /// Producer-supplied fact content.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// When the fact entered the pipeline.
    pub recorded_at: Timestamp,
    /// Child nodes, ordered by `node_id`.
    #[serde(default)]
    pub children: Vec<LineageTreeNode>,
}

impl LineageTreeNode {
    fn from_record(record: &LineageRecord, children: Vec<Self>) -> Self {
        Self {
            node_id: record.node_id.clone(),
            action_taken: record.action_taken.clone(),
            payload: record.payload.clone(),
            recorded_at: record.recorded_at,
            children,
        }
    }
}

/// The full parent to children structure of one `root_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageTree {
    /// The tree identifier.
    pub root_id: String,
    /// Top-level nodes (records without a parent), ordered by `node_id`.
    pub roots: Vec<LineageTreeNode>,
    /// Number of nodes in `roots` and all their descendants.
    pub node_count: usize,
    /// True if some stored nodes could not be attached to the tree.
    pub truncated: bool,
    /// Nodes left out because an ancestor is expired, missing or pruned.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub orphans: Vec<String>,
    /// When the tree was written to the archive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<Timestamp>,
}

impl LineageTree {
    /// Assembles a tree from the live records of one partition.
    ///
    /// Each record is attached under its parent. Records whose parent chain
    /// does not lead to a top-level record are reported as orphans. Every
    /// node appears at most once.
    #[must_use]
    pub fn assemble(root_id: impl Into<String>, records: &[LineageRecord]) -> Self {
        let root_id = root_id.into();

        let mut tops: Vec<&LineageRecord> = Vec::new();
        let mut children: HashMap<&str, Vec<&LineageRecord>> = HashMap::new();
        for record in records {
            match record.parent_id.as_deref() {
                None => tops.push(record),
                Some(parent) => children.entry(parent).or_default().push(record),
            }
        }
        tops.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        for list in children.values_mut() {
            list.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        }

        // Pre-order walk; reversing it guarantees children are built before
        // their parent.
        let mut visited: HashSet<&str> = HashSet::new();
        let mut order: Vec<&LineageRecord> = Vec::with_capacity(records.len());
        let mut stack: Vec<&LineageRecord> = tops.iter().rev().copied().collect();
        while let Some(record) = stack.pop() {
            if !visited.insert(record.node_id.as_str()) {
                continue;
            }
            order.push(record);
            if let Some(kids) = children.get(record.node_id.as_str()) {
                stack.extend(kids.iter().rev().copied());
            }
        }

        let mut built: HashMap<&str, LineageTreeNode> = HashMap::with_capacity(order.len());
        for record in order.iter().rev() {
            let kids = children
                .get(record.node_id.as_str())
                .map(|kids| {
                    kids.iter()
                        .filter_map(|kid| built.remove(kid.node_id.as_str()))
                        .collect()
                })
                .unwrap_or_default();
            built.insert(
                record.node_id.as_str(),
                LineageTreeNode::from_record(record, kids),
            );
        }

        let roots: Vec<LineageTreeNode> = tops
            .iter()
            .filter_map(|top| built.remove(top.node_id.as_str()))
            .collect();

        let mut orphans: Vec<String> = records
            .iter()
            .filter(|r| !visited.contains(r.node_id.as_str()))
            .map(|r| r.node_id.clone())
            .collect();
        orphans.sort();

        Self {
            root_id,
            roots,
            node_count: order.len(),
            truncated: !orphans.is_empty(),
            orphans,
            archived_at: None,
        }
    }

    /// Returns all node ids in pre-order.
    #[must_use]
    pub fn node_ids(&self) -> Vec<String> {
        let mut ids = Vec::with_capacity(self.node_count);
        let mut stack: Vec<&LineageTreeNode> = self.roots.iter().rev().collect();
        while let Some(node) = stack.pop() {
            ids.push(node.node_id.clone());
            stack.extend(node.children.iter().rev());
        }
        ids
    }

    /// Returns `(parent, child)` pairs in pre-order. Top-level nodes are
    /// paired with the tree's `root_id`.
    #[must_use]
    pub fn edges(&self) -> Vec<(String, String)> {
        let mut edges = Vec::with_capacity(self.node_count);
        let mut stack: Vec<(&str, &LineageTreeNode)> = self
            .roots
            .iter()
            .rev()
            .map(|n| (self.root_id.as_str(), n))
            .collect();
        while let Some((parent, node)) = stack.pop() {
            edges.push((parent.to_string(), node.node_id.clone()));
            stack.extend(node.children.iter().rev().map(|c| (node.node_id.as_str(), c)));
        }
        edges
    }

    /// Returns the length of the longest root-to-leaf path.
    #[must_use]
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut stack: Vec<(usize, &LineageTreeNode)> = self.roots.iter().map(|n| (1, n)).collect();
        while let Some((level, node)) = stack.pop() {
            deepest = deepest.max(level);
            stack.extend(node.children.iter().map(|c| (level + 1, c)));
        }
        deepest
    }

    /// Returns true if the tree is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.node_count == 0
    }
}
