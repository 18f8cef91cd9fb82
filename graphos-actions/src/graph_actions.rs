//! The `graph` component: actions over executable nodes.

use std::sync::Arc;

use async_trait::async_trait;
use graphos_core::action::{ActionContext, ActionHandler, ActionMeta, ArgMap};
use graphos_core::error::ActionError;
use graphos_core::graph::{GraphStore, Node, NodeQuery, QueryOptions};
use graphos_core::scope::{ScopeTarget, file_scope};
use serde_json::{Value, json};

use crate::executable::{
    EXECUTABLE_SOURCE_PROPERTY, EXECUTABLE_TYPE_PROPERTY, Executable, ExecutableRuntime,
    ExecutableType,
};
use crate::registry::ActionRegistry;

pub const GRAPH_COMPONENT: &str = "graph";
pub const EXECUTE_ACTION: &str = "execute";
pub const QUERY_ACTION: &str = "query";
pub const CREATE_EXECUTABLE_ACTION: &str = "create_executable";

/// Scope of `graph.query`. Queries span nodes, so they are granted as a whole.
pub const QUERY_SCOPE: &str = "graph:query";

/// Argument keys that address a node instead of feeding its context.
pub const ADDRESS_KEYS: &[&str] = &["node_id", "path", "scope_id"];

fn str_arg<'a>(args: &'a ArgMap, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Scope of a node-addressed call: explicit `scope_id`, else the file scope
/// of `path`, else the node id itself.
pub fn graph_scope(args: &ArgMap) -> Result<String, ActionError> {
    if let Some(scope_id) = str_arg(args, "scope_id") {
        return Ok(scope_id.to_string());
    }
    if let Some(path) = str_arg(args, "path") {
        return Ok(file_scope(path));
    }
    str_arg(args, "node_id")
        .or_else(|| str_arg(args, "id"))
        .map(|node_id| ScopeTarget::Node(node_id.to_string()).scope_id())
        .ok_or_else(|| ActionError::validation("arguments name no node_id, path or id"))
}

async fn resolve_node(store: &dyn GraphStore, args: &ArgMap) -> Result<Node, ActionError> {
    if let Some(node_id) = str_arg(args, "node_id") {
        return Ok(store.get(node_id).await?);
    }
    if let Some(path) = str_arg(args, "path") {
        return Ok(store.get_by_path(path).await?);
    }
    Err(ActionError::validation("node_id or path is required"))
}

/// Evaluation context of `graph.execute`: entries of a nested `context`
/// object, overlaid with every non-address top-level argument.
fn execution_context(args: &ArgMap) -> ArgMap {
    let mut context = match args.get("context") {
        Some(Value::Object(nested)) => nested.clone(),
        _ => ArgMap::new(),
    };
    for (key, value) in args {
        if key != "context" && !ADDRESS_KEYS.contains(&key.as_str()) {
            context.insert(key.clone(), value.clone());
        }
    }
    context
}

struct ExecuteAction {
    store: Arc<dyn GraphStore>,
    runtime: ExecutableRuntime,
}

#[async_trait]
impl ActionHandler for ExecuteAction {
    async fn invoke(&self, ctx: &ActionContext, args: ArgMap) -> Result<Value, ActionError> {
        let node = resolve_node(self.store.as_ref(), &args).await?;
        let (Some(executable_type), Some(source)) = (
            node.property_str(EXECUTABLE_TYPE_PROPERTY),
            node.property_str(EXECUTABLE_SOURCE_PROPERTY),
        ) else {
            return Err(ActionError::operation(format!(
                "node {} is not executable",
                node.id
            )));
        };
        let executable = Executable::compile(executable_type, source)
            .map_err(|err| ActionError::operation(err.to_string()))?;

        let context = execution_context(&args);
        tracing::debug!(
            execution_id = %ctx.execution_id,
            node_id = %node.id,
            executable_type = executable.executable_type().as_str(),
            context_keys = context.len(),
            "graph_execute_evaluating"
        );
        self.runtime
            .run(&executable, &context, &ctx.execution_id, &node.id)
            .await
            .map_err(|err| ActionError::operation(err.to_string()))
    }
}

struct QueryAction {
    store: Arc<dyn GraphStore>,
}

#[async_trait]
impl ActionHandler for QueryAction {
    async fn invoke(&self, _ctx: &ActionContext, args: ArgMap) -> Result<Value, ActionError> {
        let node_properties = match args.get("node_properties") {
            Some(Value::Object(properties)) => properties.clone(),
            _ => ArgMap::new(),
        };
        let mut options = QueryOptions::default();
        if let Some(limit) = args.get("limit").and_then(Value::as_u64) {
            options.limit = usize::try_from(limit).unwrap_or(usize::MAX);
        }

        let nodes = self
            .store
            .query(&NodeQuery { node_properties }, &options)
            .await?;
        let summaries: Vec<Value> = nodes.iter().map(Node::summary).collect();
        Ok(json!({ "count": summaries.len(), "nodes": summaries }))
    }
}

struct CreateExecutableAction {
    store: Arc<dyn GraphStore>,
}

#[async_trait]
impl ActionHandler for CreateExecutableAction {
    async fn invoke(&self, ctx: &ActionContext, args: ArgMap) -> Result<Value, ActionError> {
        let id = str_arg(&args, "id").ok_or_else(|| ActionError::validation("id is required"))?;
        let executable_type = str_arg(&args, EXECUTABLE_TYPE_PROPERTY)
            .ok_or_else(|| ActionError::validation("executable_type is required"))?;
        let source = args
            .get(EXECUTABLE_SOURCE_PROPERTY)
            .and_then(Value::as_str)
            .ok_or_else(|| ActionError::validation("executable is required"))?;
        Executable::compile(executable_type, source)
            .map_err(|err| ActionError::validation(err.to_string()))?;

        let mut node = Node::new(id);
        if let Some(Value::Object(extra)) = args.get("properties") {
            node.properties.extend(extra.clone());
        }
        node = node
            .with_property("name", json!(str_arg(&args, "name").unwrap_or(id)))
            .with_property(EXECUTABLE_TYPE_PROPERTY, json!(executable_type))
            .with_property(EXECUTABLE_SOURCE_PROPERTY, json!(source));
        if let Some(path) = str_arg(&args, "path") {
            node = node.with_path(path);
        }

        let stored = self.store.create_node(node).await?;
        tracing::info!(
            execution_id = %ctx.execution_id,
            node_id = %stored.id,
            executable_type = %executable_type,
            "executable_node_created"
        );
        Ok(json!({ "node_id": stored.id, "version": stored.version }))
    }
}

fn execute_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "node_id": { "type": "string", "minLength": 1, "description": "Id of the executable node" },
            "path": { "type": "string", "minLength": 1, "description": "Path of the executable node" },
            "context": { "type": "object", "description": "Values bound to context[...] during evaluation" }
        },
        "anyOf": [ { "required": ["node_id"] }, { "required": ["path"] } ]
    })
}

fn query_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "node_properties": { "type": "object", "description": "Properties every returned node must match exactly" },
            "limit": { "type": "integer", "minimum": 1 }
        },
        "additionalProperties": false
    })
}

fn create_executable_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "id": { "type": "string", "minLength": 1 },
            "name": { "type": "string" },
            "executable_type": { "type": "string", "enum": ExecutableType::ACCEPTED },
            "executable": { "type": "string" },
            "path": { "type": "string", "minLength": 1 },
            "properties": { "type": "object" }
        },
        "required": ["id", "executable_type", "executable"]
    })
}

/// Register `graph.execute`, `graph.query` and `graph.create_executable`.
pub async fn register_graph_actions(
    registry: &ActionRegistry,
    store: Arc<dyn GraphStore>,
    runtime: ExecutableRuntime,
) -> Result<(), ActionError> {
    registry
        .register(
            GRAPH_COMPONENT,
            EXECUTE_ACTION,
            ActionMeta::new("Evaluate an executable node against a context")
                .with_input_schema(execute_schema())
                .with_scope_extractor(graph_scope)
                .with_handler(Arc::new(ExecuteAction {
                    store: store.clone(),
                    runtime,
                })),
        )
        .await?;
    registry
        .register(
            GRAPH_COMPONENT,
            QUERY_ACTION,
            ActionMeta::new("Find nodes whose properties match exactly")
                .with_input_schema(query_schema())
                .with_scope_extractor(|_args| Ok(QUERY_SCOPE.to_string()))
                .with_handler(Arc::new(QueryAction {
                    store: store.clone(),
                })),
        )
        .await?;
    registry
        .register(
            GRAPH_COMPONENT,
            CREATE_EXECUTABLE_ACTION,
            ActionMeta::new("Create a new executable node")
                .with_input_schema(create_executable_schema())
                .with_scope_extractor(graph_scope)
                .with_handler(Arc::new(CreateExecutableAction { store })),
        )
        .await?;
    Ok(())
}
