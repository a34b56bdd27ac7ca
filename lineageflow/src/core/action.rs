//! Classification of the transformation a lineage record represents.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kind of transformation a lineage record represents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActionTaken {
    /// The record entered the system.
    Created,
    /// The record was derived from its parent by a transformation.
    Transformed,
    /// The record combines its parent with other inputs.
    Merged,
    /// The record is one part of its parent.
    Split,
    /// The record is a verbatim copy of its parent.
    Copied,
    /// The parent was read without producing new data.
    Read,
    /// The parent was deleted.
    Deleted,
    /// Any producer-defined action.
    ///
    /// Built directly, it may hold a known name such as `"created"`; such a
    /// value only equals its named variant after [`normalized`](Self::normalized).
    Other(String),
}

impl ActionTaken {
    /// Returns the canonical string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Created => "created",
            Self::Transformed => "transformed",
            Self::Merged => "merged",
            Self::Split => "split",
            Self::Copied => "copied",
            Self::Read => "read",
            Self::Deleted => "deleted",
            Self::Other(s) => s,
        }
    }

    /// Folds an `Other` that spells a known action into that action, so the
    /// value compares equal to what a serde round-trip would produce.
    #[must_use]
    pub fn normalized(self) -> Self {
        match self {
            Self::Other(name) => Self::from(name.as_str()),
            known => known,
        }
    }

    /// Returns true if the action produces new data derived from its parent.
    #[must_use]
    pub fn forms_lineage(&self) -> bool {
        !matches!(self, Self::Read | Self::Deleted)
    }
}

impl fmt::Display for ActionTaken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for ActionTaken {
    fn from(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "created" | "create" => Self::Created,
            "transformed" | "transform" => Self::Transformed,
            "merged" | "merge" => Self::Merged,
            "split" => Self::Split,
            "copied" | "copy" => Self::Copied,
            "read" => Self::Read,
            "deleted" | "delete" => Self::Deleted,
            _ => Self::Other(s.to_string()),
        }
    }
}

impl From<String> for ActionTaken {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<ActionTaken> for String {
    fn from(action: ActionTaken) -> Self {
        action.as_str().to_string()
    }
}

impl FromStr for ActionTaken {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}
