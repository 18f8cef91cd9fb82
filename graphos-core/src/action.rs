use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ActionError;

/// Resolved argument map handed to scope extractors and operations.
pub type ArgMap = serde_json::Map<String, serde_json::Value>;

/// Derives the authorization scope from the resolved arguments of one call.
///
/// The signature fixes the arity: an extractor takes exactly the argument map.
///
/// ```compile_fail
/// use graphos_core::action::ActionMeta;
///
/// // Zero-argument extractors do not type-check.
/// let meta = ActionMeta::new("noop").with_scope_extractor(|| Ok("scope".to_string()));
/// ```
///
/// ```compile_fail
/// use graphos_core::action::{ActionMeta, ArgMap};
///
/// // Neither do two-argument ones.
/// let meta = ActionMeta::new("noop")
///     .with_scope_extractor(|_a: &ArgMap, _b: &ArgMap| Ok("scope".to_string()));
/// ```
pub type ScopeExtractor = Arc<dyn Fn(&ArgMap) -> Result<String, ActionError> + Send + Sync>;

/// `(component, action name)` pair identifying a registered action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActionKey {
    pub component: String,
    pub action: String,
}

impl ActionKey {
    pub fn new(component: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            action: action.into(),
        }
    }
}

impl fmt::Display for ActionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.component, self.action)
    }
}

/// Identity and scope of the execution an operation runs under.
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub execution_id: String,
    pub caller_actor_id: String,
    pub scope_id: String,
    pub key: ActionKey,
}

/// The operation behind a registered action.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn invoke(
        &self,
        ctx: &ActionContext,
        args: ArgMap,
    ) -> Result<serde_json::Value, ActionError>;
}

/// Metadata supplied at registration. `input_schema`, `scope_extractor` and
/// `handler` are required; the registry rejects metadata missing any of them.
#[derive(Clone, Default)]
pub struct ActionMeta {
    pub description: String,
    pub input_schema: Option<serde_json::Value>,
    pub scope_extractor: Option<ScopeExtractor>,
    pub handler: Option<Arc<dyn ActionHandler>>,
}

impl ActionMeta {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Self::default()
        }
    }

    pub fn with_input_schema(mut self, schema: serde_json::Value) -> Self {
        self.input_schema = Some(schema);
        self
    }

    pub fn with_scope_extractor<F>(mut self, extractor: F) -> Self
    where
        F: Fn(&ArgMap) -> Result<String, ActionError> + Send + Sync + 'static,
    {
        self.scope_extractor = Some(Arc::new(extractor));
        self
    }

    pub fn with_handler(mut self, handler: Arc<dyn ActionHandler>) -> Self {
        self.handler = Some(handler);
        self
    }
}

impl fmt::Debug for ActionMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionMeta")
            .field("description", &self.description)
            .field("input_schema", &self.input_schema)
            .field("scope_extractor", &self.scope_extractor.is_some())
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

/// One invocation, consumed once by one runner. `scope_id` is resolved before
/// the runner starts and never recomputed.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRequest {
    pub execution_id: String,
    pub caller_actor_id: String,
    pub component: String,
    pub action_name: String,
    pub args: ArgMap,
    pub scope_id: String,
}

impl ExecutionRequest {
    pub fn new(
        caller_actor_id: impl Into<String>,
        key: &ActionKey,
        args: ArgMap,
        scope_id: impl Into<String>,
    ) -> Self {
        Self {
            execution_id: new_execution_id(),
            caller_actor_id: caller_actor_id.into(),
            component: key.component.clone(),
            action_name: key.action.clone(),
            args,
            scope_id: scope_id.into(),
        }
    }

    pub fn key(&self) -> ActionKey {
        ActionKey::new(&self.component, &self.action_name)
    }

    pub fn context(&self) -> ActionContext {
        ActionContext {
            execution_id: self.execution_id.clone(),
            caller_actor_id: self.caller_actor_id.clone(),
            scope_id: self.scope_id.clone(),
            key: self.key(),
        }
    }
}

pub fn new_execution_id() -> String {
    format!("exec-{}", uuid::Uuid::new_v4())
}
