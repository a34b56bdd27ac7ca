//! Parsing of raw producer facts.

use serde_json::{Map, Value};

use crate::core::{ActionTaken, LineageEvent};
use crate::errors::PublishError;
use crate::utils::{generate_node_id, is_valid_identifier};

/// Builds a lineage event from a raw fact without publishing it.
///
/// Rules:
/// - `node_id` is assigned (UUID v4) when absent.
/// - `action_taken` (or its alias `action`) is required.
/// - A fact with neither `parent_id` nor `root_id` starts a new tree rooted
///   at itself; a fact with a parent must name its root.
/// - Every other field is kept as the payload.
pub fn parse_fact(fact: Value) -> Result<LineageEvent, PublishError> {
    let Value::Object(mut fields) = fact else {
        return Err(PublishError::invalid_fact("fact must be a JSON object"));
    };

    let node_id = match take_identifier(&mut fields, "node_id")? {
        Some(id) => id,
        None => generate_node_id(),
    };
    let parent_id = take_identifier(&mut fields, "parent_id")?;
    let root_id = take_identifier(&mut fields, "root_id")?;

    // With both present, `action` stays in the payload.
    let action = match take_string(&mut fields, "action_taken")? {
        Some(action) => Some(action),
        None => take_string(&mut fields, "action")?,
    };
    let action = action
        .filter(|a| !a.trim().is_empty())
        .ok_or_else(|| PublishError::invalid_fact("missing action_taken"))?;

    let root_id = match (root_id, &parent_id) {
        (Some(root), _) => root,
        (None, None) => node_id.clone(),
        (None, Some(_)) => {
            return Err(PublishError::invalid_fact(format!(
                "node '{node_id}' has a parent but no root_id"
            )))
        }
    };
    if parent_id.as_deref() == Some(node_id.as_str()) {
        return Err(PublishError::invalid_fact(format!(
            "node '{node_id}' cannot be its own parent"
        )));
    }

    let mut event = LineageEvent::new(root_id, node_id, ActionTaken::from(action.trim()))
        .with_payload(Value::Object(fields));
    event.parent_id = parent_id;
    Ok(event)
}

fn take_string(fields: &mut Map<String, Value>, key: &str) -> Result<Option<String>, PublishError> {
    match fields.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(other) => Err(PublishError::invalid_fact(format!(
            "{key} must be a string, got {other}"
        ))),
    }
}

fn take_identifier(
    fields: &mut Map<String, Value>,
    key: &str,
) -> Result<Option<String>, PublishError> {
    match take_string(fields, key)? {
        Some(id) if !is_valid_identifier(&id) => Err(PublishError::invalid_fact(format!(
            "{key} '{id}' is not a valid identifier"
        ))),
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_new_tree_roots_at_itself() {
        let event = parse_fact(json!({"node_id": "A", "action_taken": "created"})).unwrap();
        assert_eq!(event.root_id, "A");
        assert_eq!(event.parent_id, None);
        assert_eq!(event.action_taken, ActionTaken::Created);
    }

    #[test]
    fn test_node_id_assigned_when_missing() {
        let event = parse_fact(json!({"action": "transform", "root_id": "R"})).unwrap();
        assert!(uuid::Uuid::parse_str(&event.node_id).is_ok());
        assert_eq!(event.root_id, "R");
        assert_eq!(event.action_taken, ActionTaken::Transformed);
    }

    #[test]
    fn test_parent_without_root_is_rejected() {
        let err = parse_fact(json!({"node_id": "B", "parent_id": "A", "action": "copied"}))
            .unwrap_err();
        assert!(err.to_string().contains("no root_id"));
    }

    #[test]
    fn test_missing_action_is_rejected() {
        let err = parse_fact(json!({"node_id": "A"})).unwrap_err();
        assert!(matches!(err, PublishError::InvalidFact { .. }));

        let err = parse_fact(json!({"node_id": "A", "action": "  "})).unwrap_err();
        assert!(matches!(err, PublishError::InvalidFact { .. }));
    }

    #[test]
    fn test_invalid_identifiers() {
        assert!(parse_fact(json!({"node_id": "a/b", "action": "created"})).is_err());
        assert!(parse_fact(json!({"node_id": 7, "action": "created"})).is_err());
        assert!(parse_fact(json!({"node_id": "A", "parent_id": "A", "root_id": "R", "action": "x"}))
            .is_err());
        assert!(parse_fact(json!(["not", "an", "object"])).is_err());
    }

    #[test]
    fn test_remaining_fields_become_payload() {
        let event = parse_fact(json!({
            "node_id": "B",
            "parent_id": "A",
            "root_id": "R",
            "action_taken": "merged",
            "action": "ignored alias",
            "table": "orders",
        }))
        .unwrap();

        assert_eq!(event.parent_id.as_deref(), Some("A"));
        assert_eq!(event.action_taken, ActionTaken::Merged);
        assert_eq!(event.payload, json!({"action": "ignored alias", "table": "orders"}));
    }

    #[test]
    fn test_null_fields_count_as_missing() {
        let event = parse_fact(json!({"node_id": "A", "parent_id": null, "action": "read"})).unwrap();
        assert_eq!(event.root_id, "A");
        assert_eq!(event.payload, json!({}));
    }
}
