//! Fixtures for lineage tests.

use serde_json::{json, Value};

use crate::core::{ActionTaken, LineageEvent, LineageRecord};

/// Builds a raw producer fact.
#[must_use]
pub fn fact(node_id: &str, parent_id: Option<&str>, root_id: Option<&str>, action: &str) -> Value {
    let mut fact = json!({ "node_id": node_id, "action_taken": action });
    if let Some(parent) = parent_id {
        fact["parent_id"] = json!(parent);
    }
    if let Some(root) = root_id {
        fact["root_id"] = json!(root);
    }
    fact
}

/// Events for a linear chain `nodes[0] -> nodes[1] -> ...` in tree `root_id`.
///
/// The first node is the parentless top of the chain.
#[must_use]
pub fn chain_events(root_id: &str, nodes: &[&str]) -> Vec<LineageEvent> {
    nodes
        .iter()
        .enumerate()
        .map(|(i, node)| {
            let action = if i == 0 {
                ActionTaken::Created
            } else {
                ActionTaken::Transformed
            };
            let event = LineageEvent::new(root_id, *node, action);
            match i.checked_sub(1).map(|p| nodes[p]) {
                Some(parent) => event.with_parent(parent),
                None => event,
            }
        })
        .collect()
}

/// Records for a linear chain, without expiry.
#[must_use]
pub fn chain_records(root_id: &str, nodes: &[&str]) -> Vec<LineageRecord> {
    chain_events(root_id, nodes)
        .iter()
        .map(|event| event.to_record(0))
        .collect()
}

/// Records of a complete tree with the given fan-out and depth.
///
/// Node ids encode their path (`n`, `n.0`, `n.0.1`, ...).
#[must_use]
pub fn wide_tree_records(root_id: &str, fanout: usize, depth: usize) -> Vec<LineageRecord> {
    let mut records = vec![LineageRecord::new(root_id, "n", ActionTaken::Created)];
    let mut frontier = vec!["n".to_string()];
    for _ in 0..depth {
        let mut next = Vec::with_capacity(frontier.len() * fanout);
        for parent in &frontier {
            for i in 0..fanout {
                let node = format!("{parent}.{i}");
                records.push(
                    LineageRecord::new(root_id, node.clone(), ActionTaken::Transformed)
                        .with_parent(parent.clone()),
                );
                next.push(node);
            }
        }
        frontier = next;
    }
    records
}
