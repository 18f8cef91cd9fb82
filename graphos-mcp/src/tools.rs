use graphos_actions::ActionInvocation;
use graphos_actions::graph_actions::{EXECUTE_ACTION, GRAPH_COMPONENT};
use graphos_actions::registry::ActionRegistry;
use graphos_core::action::{ActionKey, ArgMap};
use graphos_core::error::ActionError;
use graphos_core::scope::ScopeTarget;
use serde_json::Value;

use crate::protocol::McpToolDefinition;

/// Registry component whose actions are exposed as tools.
pub const EXPOSED_COMPONENT: &str = GRAPH_COMPONENT;

/// Tool table for `tools/list`, sorted by name.
pub(crate) async fn tool_definitions(registry: &ActionRegistry) -> Vec<McpToolDefinition> {
    registry
        .list_actions(Some(EXPOSED_COMPONENT))
        .await
        .iter()
        .map(|action| McpToolDefinition {
            name: action.key.to_string(),
            description: action.description.clone(),
            input_schema: action.input_schema.clone(),
        })
        .collect()
}

/// Map a tool name onto a registry key. Only names of the exposed component
/// are accepted; whether the action exists is decided by the registry.
pub(crate) fn tool_key(name: &str) -> Result<ActionKey, ActionError> {
    match name.split_once('.') {
        Some((component, action)) if component == EXPOSED_COMPONENT && !action.is_empty() => {
            Ok(ActionKey::new(component, action))
        }
        _ => Err(ActionError::UnknownOperation(name.to_string())),
    }
}

/// Turn `tools/call` arguments into an invocation. Clients never choose a
/// scope: `scope_id` is dropped. `graph.execute` addresses its node through
/// the invocation target and has its `context` merged into the arguments.
pub(crate) fn build_invocation(
    actor_id: &str,
    name: &str,
    arguments: Value,
) -> Result<ActionInvocation, ActionError> {
    let key = tool_key(name)?;
    let mut args = match arguments {
        Value::Object(map) => map,
        Value::Null => ArgMap::new(),
        other => {
            return Err(ActionError::payload(format!(
                "arguments must be an object, got {other}"
            )));
        }
    };
    args.remove("scope_id");

    if key.action != EXECUTE_ACTION {
        return Ok(ActionInvocation::new(actor_id, key, args));
    }

    let target = match (args.get("node_id"), args.get("path")) {
        (Some(Value::String(node_id)), _) => Some(ScopeTarget::Node(node_id.clone())),
        (None, Some(Value::String(path))) => Some(ScopeTarget::Path(path.clone())),
        _ => None,
    };
    let mut merged = match args.remove("context") {
        Some(Value::Object(context)) => context,
        None | Some(Value::Null) => ArgMap::new(),
        Some(other) => {
            return Err(ActionError::payload(format!(
                "context must be an object, got {other}"
            )));
        }
    };
    merged.extend(args);

    let invocation = ActionInvocation::new(actor_id, key, merged);
    Ok(match target {
        Some(target) => invocation.with_target(target),
        None => invocation,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn tool_key_accepts_exposed_component_only() {
        assert_eq!(
            tool_key("graph.execute").expect("key"),
            ActionKey::new("graph", "execute")
        );
        assert!(matches!(tool_key("admin.reset"), Err(ActionError::UnknownOperation(_))));
        assert!(tool_key("graph.").is_err());
        assert!(tool_key("execute").is_err());
    }

    #[test]
    fn execute_merges_context_and_targets_node() {
        let invocation = build_invocation(
            "c1",
            "graph.execute",
            json!({"node_id": "test:node", "context": {"a": 20, "b": 22}}),
        )
        .expect("invocation");

        assert_eq!(invocation.target, Some(ScopeTarget::Node("test:node".into())));
        assert_eq!(invocation.args.get("a"), Some(&json!(20)));
        assert_eq!(invocation.args.get("b"), Some(&json!(22)));
        assert!(!invocation.args.contains_key("context"));
    }

    #[test]
    fn node_id_wins_over_context_key() {
        let invocation = build_invocation(
            "c1",
            "graph.execute",
            json!({"node_id": "real", "context": {"node_id": "spoofed"}}),
        )
        .expect("invocation");
        assert_eq!(invocation.args.get("node_id"), Some(&json!("real")));
    }

    #[test]
    fn path_target_when_no_node_id() {
        let invocation = build_invocation("c1", "graph.execute", json!({"path": "/a/b.ex"}))
            .expect("invocation");
        assert_eq!(invocation.target, Some(ScopeTarget::Path("/a/b.ex".into())));
    }

    #[test]
    fn client_scope_is_dropped() {
        let invocation = build_invocation(
            "c1",
            "graph.create_executable",
            json!({"id": "n1", "scope_id": "tenant-admin"}),
        )
        .expect("invocation");
        assert!(invocation.target.is_none());
        assert!(!invocation.args.contains_key("scope_id"));
    }

    #[test]
    fn non_object_arguments_are_payload_errors() {
        assert!(matches!(
            build_invocation("c1", "graph.query", json!([1, 2])),
            Err(ActionError::InvalidPayloadFormat(_))
        ));
        assert!(matches!(
            build_invocation("c1", "graph.execute", json!({"node_id": "n", "context": 5})),
            Err(ActionError::InvalidPayloadFormat(_))
        ));
        assert!(build_invocation("c1", "graph.query", Value::Null).is_ok());
    }
}
