use std::collections::HashMap;
use std::sync::Arc;

use graphos_core::action::{ActionHandler, ActionKey, ActionMeta, ArgMap, ScopeExtractor};
use graphos_core::error::ActionError;
use tokio::sync::RwLock;

use crate::schema::InputValidator;

/// A registered action with its compiled input schema.
pub struct RegisteredAction {
    pub key: ActionKey,
    pub description: String,
    pub input_schema: serde_json::Value,
    scope_extractor: ScopeExtractor,
    handler: Arc<dyn ActionHandler>,
    validator: InputValidator,
}

impl RegisteredAction {
    pub fn extract_scope(&self, args: &ArgMap) -> Result<String, ActionError> {
        (self.scope_extractor)(args)
    }

    pub fn validate(&self, args: &ArgMap) -> Result<(), ActionError> {
        self.validator
            .validate(&serde_json::Value::Object(args.clone()))
    }

    pub fn handler(&self) -> Arc<dyn ActionHandler> {
        self.handler.clone()
    }
}

impl std::fmt::Debug for RegisteredAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredAction")
            .field("key", &self.key)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Lookup table from `(component, action)` to action metadata.
///
/// Re-registering a key replaces the previous entry; concurrent registrations
/// of the same key resolve to exactly one winner.
#[derive(Default)]
pub struct ActionRegistry {
    actions: RwLock<HashMap<ActionKey, Arc<RegisteredAction>>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(
        &self,
        component: &str,
        action: &str,
        meta: ActionMeta,
    ) -> Result<(), ActionError> {
        let key = ActionKey::new(component, action);
        let invalid = |reason: &str| ActionError::InvalidMetadata {
            key: key.to_string(),
            reason: reason.to_string(),
        };

        if component.is_empty() || action.is_empty() {
            return Err(invalid("component and action name must be non-empty"));
        }
        let input_schema = meta
            .input_schema
            .ok_or_else(|| invalid("input_schema is required"))?;
        let scope_extractor = meta
            .scope_extractor
            .ok_or_else(|| invalid("scope_extractor is required"))?;
        let handler = meta.handler.ok_or_else(|| invalid("handler is required"))?;
        let validator = InputValidator::compile(&input_schema).map_err(|reason| invalid(&reason))?;

        let entry = Arc::new(RegisteredAction {
            key: key.clone(),
            description: meta.description,
            input_schema,
            scope_extractor,
            handler,
            validator,
        });

        let replaced = self.actions.write().await.insert(key.clone(), entry).is_some();
        tracing::info!(action = %key, replaced, "action_registered");
        Ok(())
    }

    pub async fn get_meta(&self, key: &ActionKey) -> Option<Arc<RegisteredAction>> {
        self.actions.read().await.get(key).cloned()
    }

    /// Registered actions sorted by key, optionally limited to one component.
    pub async fn list_actions(&self, component: Option<&str>) -> Vec<Arc<RegisteredAction>> {
        let actions = self.actions.read().await;
        let mut listed: Vec<_> = actions
            .values()
            .filter(|entry| component.is_none_or(|c| entry.key.component == c))
            .cloned()
            .collect();
        listed.sort_by(|a, b| a.key.cmp(&b.key));
        listed
    }

    pub async fn len(&self) -> usize {
        self.actions.read().await.len()
    }

    pub async fn clear(&self) {
        self.actions.write().await.clear();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use async_trait::async_trait;
    use graphos_core::action::ActionContext;
    use serde_json::json;

    use super::*;

    /// Echoes its arguments back, tagged with the handler's label.
    pub(crate) struct EchoHandler(pub &'static str);

    #[async_trait]
    impl ActionHandler for EchoHandler {
        async fn invoke(
            &self,
            _ctx: &ActionContext,
            args: ArgMap,
        ) -> Result<serde_json::Value, ActionError> {
            Ok(json!({ "handler": self.0, "args": args }))
        }
    }

    pub(crate) fn echo_meta(label: &'static str) -> ActionMeta {
        ActionMeta::new("echo")
            .with_input_schema(json!({
                "type": "object",
                "properties": { "node_id": { "type": "string" } },
                "required": ["node_id"]
            }))
            .with_scope_extractor(|args| {
                args.get("node_id")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .ok_or_else(|| ActionError::validation("node_id missing"))
            })
            .with_handler(Arc::new(EchoHandler(label)))
    }

    #[tokio::test]
    async fn register_then_lookup() {
        let registry = ActionRegistry::new();
        registry.register("test", "echo", echo_meta("a")).await.expect("register");

        let entry = registry
            .get_meta(&ActionKey::new("test", "echo"))
            .await
            .expect("registered");
        assert_eq!(entry.description, "echo");
        assert!(registry.get_meta(&ActionKey::new("test", "other")).await.is_none());
    }

    #[tokio::test]
    async fn missing_schema_is_rejected() {
        let registry = ActionRegistry::new();
        let meta = ActionMeta {
            input_schema: None,
            ..echo_meta("a")
        };
        let err = registry.register("test", "echo", meta).await.expect_err("rejected");
        assert!(matches!(err, ActionError::InvalidMetadata { .. }));
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn missing_extractor_is_rejected() {
        let registry = ActionRegistry::new();
        let meta = ActionMeta {
            scope_extractor: None,
            ..echo_meta("a")
        };
        let err = registry.register("test", "echo", meta).await.expect_err("rejected");
        match err {
            ActionError::InvalidMetadata { key, reason } => {
                assert_eq!(key, "test.echo");
                assert!(reason.contains("scope_extractor"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn uncompilable_schema_is_rejected() {
        let registry = ActionRegistry::new();
        let meta = echo_meta("a").with_input_schema(json!({"type": "no-such-type"}));
        assert!(registry.register("test", "echo", meta).await.is_err());
    }

    #[tokio::test]
    async fn reregistration_replaces_previous_entry() {
        let registry = ActionRegistry::new();
        registry.register("test", "echo", echo_meta("first")).await.expect("first");
        registry.register("test", "echo", echo_meta("second")).await.expect("second");
        assert_eq!(registry.len().await, 1);

        let entry = registry
            .get_meta(&ActionKey::new("test", "echo"))
            .await
            .expect("registered");
        let ctx = ActionContext {
            execution_id: "exec-1".into(),
            caller_actor_id: "c1".into(),
            scope_id: "n1".into(),
            key: entry.key.clone(),
        };
        let out = entry.handler().invoke(&ctx, ArgMap::new()).await.expect("invoke");
        assert_eq!(out["handler"], "second");
    }

    #[tokio::test]
    async fn concurrent_registration_has_single_winner() {
        let registry = Arc::new(ActionRegistry::new());
        let mut tasks = Vec::new();
        for label in ["a", "b", "c", "d"] {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                registry.register("test", "echo", echo_meta(label)).await
            }));
        }
        for task in tasks {
            task.await.expect("join").expect("register");
        }
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn list_filters_by_component_and_sorts() {
        let registry = ActionRegistry::new();
        registry.register("graph", "query", echo_meta("q")).await.expect("q");
        registry.register("graph", "execute", echo_meta("e")).await.expect("e");
        registry.register("admin", "noop", echo_meta("n")).await.expect("n");

        let graph: Vec<String> = registry
            .list_actions(Some("graph"))
            .await
            .iter()
            .map(|entry| entry.key.to_string())
            .collect();
        assert_eq!(graph, vec!["graph.execute", "graph.query"]);
        assert_eq!(registry.list_actions(None).await.len(), 3);

        registry.clear().await;
        assert!(registry.list_actions(None).await.is_empty());
    }

    #[tokio::test]
    async fn validation_uses_compiled_schema() {
        let registry = ActionRegistry::new();
        registry.register("test", "echo", echo_meta("a")).await.expect("register");
        let entry = registry
            .get_meta(&ActionKey::new("test", "echo"))
            .await
            .expect("registered");

        let mut args = ArgMap::new();
        assert!(matches!(entry.validate(&args), Err(ActionError::ValidationError(_))));
        args.insert("node_id".into(), json!("n1"));
        assert!(entry.validate(&args).is_ok());
        assert_eq!(entry.extract_scope(&args).expect("scope"), "n1");
    }
}
