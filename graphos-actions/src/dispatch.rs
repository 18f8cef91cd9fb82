use std::sync::Arc;
use std::time::Duration;

use graphos_core::action::{ActionKey, ArgMap, ExecutionRequest};
use graphos_core::error::ActionError;
use graphos_core::graph::GraphStore;
use graphos_core::scope::ScopeTarget;

use crate::graph_actions::ADDRESS_KEYS;
use crate::supervisor::{RunnerSupervisor, RunningExecution, StopOutcome};

/// A call as issued by a protocol session, before scope resolution.
#[derive(Debug, Clone)]
pub struct ActionInvocation {
    pub caller_actor_id: String,
    pub key: ActionKey,
    /// Node the call addresses. Calls without a target derive their scope
    /// from the action's scope extractor alone.
    pub target: Option<ScopeTarget>,
    pub args: ArgMap,
}

impl ActionInvocation {
    pub fn new(caller_actor_id: impl Into<String>, key: ActionKey, args: ArgMap) -> Self {
        Self {
            caller_actor_id: caller_actor_id.into(),
            key,
            target: None,
            args,
        }
    }

    pub fn with_target(mut self, target: ScopeTarget) -> Self {
        self.target = Some(target);
        self
    }
}

/// Resolves invocations into execution requests and runs them through the
/// supervisor with a bounded wait.
pub struct ActionDispatcher {
    supervisor: Arc<RunnerSupervisor>,
    store: Arc<dyn GraphStore>,
    execution_timeout: Duration,
}

impl ActionDispatcher {
    pub fn new(
        supervisor: Arc<RunnerSupervisor>,
        store: Arc<dyn GraphStore>,
        execution_timeout: Duration,
    ) -> Self {
        Self {
            supervisor,
            store,
            execution_timeout,
        }
    }

    pub fn supervisor(&self) -> &Arc<RunnerSupervisor> {
        &self.supervisor
    }

    /// Build the `ExecutionRequest` for `invocation`. Unknown actions and
    /// missing target nodes fail here, before any runner exists.
    pub async fn resolve(&self, invocation: ActionInvocation) -> Result<ExecutionRequest, ActionError> {
        let ActionInvocation {
            caller_actor_id,
            key,
            target,
            mut args,
        } = invocation;

        let action = self
            .supervisor
            .registry()
            .get_meta(&key)
            .await
            .ok_or_else(|| ActionError::UnknownOperation(key.to_string()))?;

        let scope_id = match target {
            Some(target) => {
                // The target alone addresses the node.
                for address_key in ADDRESS_KEYS {
                    args.remove(*address_key);
                }
                match &target {
                    ScopeTarget::Explicit { node_id, scope_id } => {
                        self.store.get(node_id).await?;
                        args.insert("node_id".into(), node_id.clone().into());
                        args.insert("scope_id".into(), scope_id.clone().into());
                    }
                    ScopeTarget::Node(node_id) => {
                        self.store.get(node_id).await?;
                        args.insert("node_id".into(), node_id.clone().into());
                    }
                    ScopeTarget::Path(path) => {
                        self.store.get_by_path(path).await?;
                        args.insert("path".into(), path.clone().into());
                    }
                }
                target.scope_id()
            }
            None => action.extract_scope(&args)?,
        };

        Ok(ExecutionRequest::new(caller_actor_id, &key, args, scope_id))
    }

    /// Start a runner without waiting for it.
    pub async fn submit(&self, invocation: ActionInvocation) -> Result<RunningExecution, ActionError> {
        let request = self.resolve(invocation).await?;
        tracing::debug!(
            execution_id = %request.execution_id,
            action = %request.key(),
            actor_id = %request.caller_actor_id,
            scope_id = %request.scope_id,
            "execution_submitted"
        );
        self.supervisor.start_runner(request)
    }

    pub async fn execute(&self, invocation: ActionInvocation) -> Result<serde_json::Value, ActionError> {
        self.execute_with_timeout(invocation, self.execution_timeout)
            .await
    }

    /// Run `invocation` and wait at most `timeout` for its result. On timeout
    /// the runner keeps running and stays reachable through `stop`.
    pub async fn execute_with_timeout(
        &self,
        invocation: ActionInvocation,
        timeout: Duration,
    ) -> Result<serde_json::Value, ActionError> {
        let execution = self.submit(invocation).await?;
        let execution_id = execution.execution_id().to_string();
        match tokio::time::timeout(timeout, execution.wait()).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    execution_id = %execution_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "execution_timed_out"
                );
                Err(ActionError::Timeout {
                    execution_id,
                    elapsed: timeout,
                })
            }
        }
    }

    pub fn stop(&self, execution_id: &str) -> StopOutcome {
        self.supervisor.stop_runner(execution_id)
    }
}
