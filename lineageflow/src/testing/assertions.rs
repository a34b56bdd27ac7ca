//! Assertions on reconstructed trees.

use std::collections::HashSet;

use crate::core::LineageTree;

/// Asserts that the tree's parent/child edges equal `expected`, in
/// pre-order. Top-level nodes are paired with the tree's `root_id`.
pub fn assert_tree_edges(tree: &LineageTree, expected: &[(&str, &str)]) {
    let actual = tree.edges();
    let expected: Vec<(String, String)> = expected
        .iter()
        .map(|(p, c)| ((*p).to_string(), (*c).to_string()))
        .collect();
    assert_eq!(
        actual, expected,
        "Unexpected edges for tree '{}'",
        tree.root_id
    );
}

/// Asserts that every node appears exactly once and that the set of nodes
/// equals `expected`.
pub fn assert_each_node_once(tree: &LineageTree, expected: &[&str]) {
    let ids = tree.node_ids();
    let unique: HashSet<&str> = ids.iter().map(String::as_str).collect();
    assert_eq!(
        unique.len(),
        ids.len(),
        "Tree '{}' contains duplicate nodes: {:?}",
        tree.root_id,
        ids
    );
    let expected: HashSet<&str> = expected.iter().copied().collect();
    assert_eq!(unique, expected, "Unexpected node set for tree '{}'", tree.root_id);
    assert_eq!(tree.node_count, ids.len());
}
