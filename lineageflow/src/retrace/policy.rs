//! Which actions a reconstruction follows.

use std::collections::BTreeSet;

use crate::core::ActionTaken;

/// Selects the nodes a reconstruction visits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TraversalPolicy {
    /// Visit every node of the tree.
    #[default]
    All,
    /// Visit only nodes with one of these actions. A node with any other
    /// action is pruned together with its subtree.
    Only(BTreeSet<ActionTaken>),
}

impl TraversalPolicy {
    /// Builds a policy from configured action names; `None` means all.
    #[must_use]
    pub fn from_actions<S: AsRef<str>>(actions: Option<&[S]>) -> Self {
        match actions {
            None => Self::All,
            Some(names) => Self::Only(names.iter().map(|n| ActionTaken::from(n.as_ref())).collect()),
        }
    }

    /// A policy that follows only actions that derive new data.
    #[must_use]
    pub fn lineage_forming() -> Self {
        Self::Only(
            [
                ActionTaken::Created,
                ActionTaken::Transformed,
                ActionTaken::Merged,
                ActionTaken::Split,
                ActionTaken::Copied,
            ]
            .into_iter()
            .collect(),
        )
    }

    /// Returns true if nodes with `action` are visited.
    #[must_use]
    pub fn allows(&self, action: &ActionTaken) -> bool {
        match self {
            Self::All => true,
            Self::Only(actions) => actions.contains(action),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_actions() {
        assert_eq!(TraversalPolicy::from_actions::<String>(None), TraversalPolicy::All);

        let policy = TraversalPolicy::from_actions(Some(&["create", "copied"][..]));
        assert!(policy.allows(&ActionTaken::Created));
        assert!(policy.allows(&ActionTaken::Copied));
        assert!(!policy.allows(&ActionTaken::Read));
    }

    #[test]
    fn test_lineage_forming_excludes_reads() {
        let policy = TraversalPolicy::lineage_forming();
        assert!(policy.allows(&ActionTaken::Merged));
        assert!(!policy.allows(&ActionTaken::Read));
        assert!(!policy.allows(&ActionTaken::Deleted));
        assert!(TraversalPolicy::All.allows(&ActionTaken::Other("audit".into())));
    }
}
