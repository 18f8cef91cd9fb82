use std::sync::Arc;
use std::time::{Duration, Instant};

use graphos_core::action::ExecutionRequest;
use graphos_core::error::ActionError;
use graphos_core::scope::{AuthDecision, ScopeService};
use serde::Serialize;

use crate::registry::ActionRegistry;

/// Lifecycle of a single execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerState {
    Pending,
    Validating,
    Authorizing,
    Executing,
    Completed,
    Denied,
    Failed,
}

impl RunnerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Denied | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Validating => "validating",
            Self::Authorizing => "authorizing",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Denied => "denied",
            Self::Failed => "failed",
        }
    }
}

/// Terminal outcome of one runner.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub execution_id: String,
    pub state: RunnerState,
    pub result: Result<serde_json::Value, ActionError>,
    /// Every state visited, starting with `Pending`.
    pub transitions: Vec<RunnerState>,
    pub duration: Duration,
}

/// Drives one `ExecutionRequest` through validation, authorization and
/// execution. The operation runs only after authorization allows it.
pub struct ActionRunner {
    request: ExecutionRequest,
    registry: Arc<ActionRegistry>,
    scope_service: Arc<dyn ScopeService>,
    state: RunnerState,
    transitions: Vec<RunnerState>,
}

impl ActionRunner {
    pub fn new(
        request: ExecutionRequest,
        registry: Arc<ActionRegistry>,
        scope_service: Arc<dyn ScopeService>,
    ) -> Self {
        Self {
            request,
            registry,
            scope_service,
            state: RunnerState::Pending,
            transitions: vec![RunnerState::Pending],
        }
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    pub async fn run(mut self) -> RunReport {
        let started = Instant::now();
        let result = self.drive().await;
        let report = RunReport {
            execution_id: self.request.execution_id.clone(),
            state: self.state,
            result,
            transitions: self.transitions,
            duration: started.elapsed(),
        };
        match &report.result {
            Ok(_) => tracing::info!(
                execution_id = %report.execution_id,
                action = %self.request.key(),
                duration_ms = report.duration.as_millis() as u64,
                "runner_completed"
            ),
            Err(err) => tracing::info!(
                execution_id = %report.execution_id,
                action = %self.request.key(),
                state = report.state.as_str(),
                error_kind = err.kind(),
                error = %err,
                "runner_finished_with_error"
            ),
        }
        report
    }

    async fn drive(&mut self) -> Result<serde_json::Value, ActionError> {
        let key = self.request.key();
        let Some(action) = self.registry.get_meta(&key).await else {
            self.transition(RunnerState::Failed);
            return Err(ActionError::UnknownOperation(key.to_string()));
        };

        self.transition(RunnerState::Validating);
        if let Err(err) = action.validate(&self.request.args) {
            self.transition(RunnerState::Failed);
            return Err(err);
        }

        self.transition(RunnerState::Authorizing);
        let derived_scope = match action.extract_scope(&self.request.args) {
            Ok(scope) => scope,
            Err(err) => {
                self.transition(RunnerState::Failed);
                return Err(err);
            }
        };
        if derived_scope != self.request.scope_id {
            tracing::warn!(
                execution_id = %self.request.execution_id,
                request_scope = %self.request.scope_id,
                derived_scope = %derived_scope,
                "runner_scope_mismatch"
            );
            return Err(self.deny());
        }

        let decision = self
            .scope_service
            .authorize(&self.request.caller_actor_id, &self.request.scope_id)
            .await;
        if let AuthDecision::Deny { reason } = decision {
            tracing::info!(
                execution_id = %self.request.execution_id,
                actor_id = %self.request.caller_actor_id,
                scope_id = %self.request.scope_id,
                reason = %reason,
                "runner_denied"
            );
            return Err(self.deny());
        }

        self.transition(RunnerState::Executing);
        let ctx = self.request.context();
        match action.handler().invoke(&ctx, self.request.args.clone()).await {
            Ok(value) => {
                self.transition(RunnerState::Completed);
                Ok(value)
            }
            Err(err) => {
                self.transition(RunnerState::Failed);
                Err(err)
            }
        }
    }

    fn deny(&mut self) -> ActionError {
        self.transition(RunnerState::Denied);
        ActionError::PermissionDenied {
            actor_id: self.request.caller_actor_id.clone(),
            scope_id: self.request.scope_id.clone(),
        }
    }

    fn transition(&mut self, next: RunnerState) {
        tracing::debug!(
            execution_id = %self.request.execution_id,
            from = self.state.as_str(),
            to = next.as_str(),
            "runner_transition"
        );
        self.state = next;
        self.transitions.push(next);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use graphos_core::action::{ActionContext, ActionHandler, ActionKey, ActionMeta, ArgMap};
    use serde_json::json;

    use super::*;
    use crate::registry::tests::echo_meta;

    /// Allows exactly the listed `(actor, scope)` pairs.
    pub(crate) struct StaticScopes(pub Vec<(&'static str, &'static str)>);

    #[async_trait]
    impl ScopeService for StaticScopes {
        async fn authorize(&self, caller_actor_id: &str, scope_id: &str) -> AuthDecision {
            if self
                .0
                .iter()
                .any(|(actor, scope)| *actor == caller_actor_id && *scope == scope_id)
            {
                AuthDecision::Allow
            } else {
                AuthDecision::Deny {
                    reason: "not granted".into(),
                }
            }
        }
    }

    struct CountingHandler(Arc<AtomicUsize>);

    #[async_trait]
    impl ActionHandler for CountingHandler {
        async fn invoke(
            &self,
            _ctx: &ActionContext,
            _args: ArgMap,
        ) -> Result<serde_json::Value, ActionError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"ok": true}))
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl ActionHandler for FailingHandler {
        async fn invoke(
            &self,
            _ctx: &ActionContext,
            _args: ArgMap,
        ) -> Result<serde_json::Value, ActionError> {
            Err(ActionError::operation("boom"))
        }
    }

    fn args(node_id: &str) -> ArgMap {
        let mut args = ArgMap::new();
        args.insert("node_id".into(), json!(node_id));
        args
    }

    fn request(actor: &str, node_id: &str, scope: &str) -> ExecutionRequest {
        ExecutionRequest::new(actor, &ActionKey::new("test", "echo"), args(node_id), scope)
    }

    async fn registry_with(meta: ActionMeta) -> Arc<ActionRegistry> {
        let registry = Arc::new(ActionRegistry::new());
        registry.register("test", "echo", meta).await.expect("register");
        registry
    }

    fn scopes() -> Arc<dyn ScopeService> {
        Arc::new(StaticScopes(vec![("c1", "n1")]))
    }

    #[tokio::test]
    async fn allowed_request_completes() {
        let registry = registry_with(echo_meta("a")).await;
        let report = ActionRunner::new(request("c1", "n1", "n1"), registry, scopes())
            .run()
            .await;

        assert_eq!(report.state, RunnerState::Completed);
        assert_eq!(
            report.transitions,
            vec![
                RunnerState::Pending,
                RunnerState::Validating,
                RunnerState::Authorizing,
                RunnerState::Executing,
                RunnerState::Completed,
            ]
        );
        assert_eq!(report.result.expect("ok")["handler"], "a");
    }

    #[tokio::test]
    async fn denied_request_never_reaches_operation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry =
            registry_with(echo_meta("a").with_handler(Arc::new(CountingHandler(calls.clone()))))
                .await;

        let report = ActionRunner::new(request("c1", "n2", "n2"), registry, scopes())
            .run()
            .await;

        assert_eq!(report.state, RunnerState::Denied);
        assert!(!report.transitions.contains(&RunnerState::Executing));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        match report.result {
            Err(ActionError::PermissionDenied { actor_id, scope_id }) => {
                assert_eq!(actor_id, "c1");
                assert_eq!(scope_id, "n2");
            }
            other => panic!("expected permission denied, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn scope_mismatch_is_denied() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry =
            registry_with(echo_meta("a").with_handler(Arc::new(CountingHandler(calls.clone()))))
                .await;

        // Request claims a granted scope but its args derive another one.
        let report = ActionRunner::new(request("c1", "n2", "n1"), registry, scopes())
            .run()
            .await;

        assert_eq!(report.state, RunnerState::Denied);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn invalid_args_fail_before_authorization() {
        let registry = registry_with(echo_meta("a")).await;
        let bad = ExecutionRequest::new("c1", &ActionKey::new("test", "echo"), ArgMap::new(), "n1");

        let report = ActionRunner::new(bad, registry, scopes()).run().await;

        assert_eq!(report.state, RunnerState::Failed);
        assert!(!report.transitions.contains(&RunnerState::Authorizing));
        assert!(matches!(report.result, Err(ActionError::ValidationError(_))));
    }

    #[tokio::test]
    async fn unknown_action_fails() {
        let registry = Arc::new(ActionRegistry::new());
        let report = ActionRunner::new(request("c1", "n1", "n1"), registry, scopes())
            .run()
            .await;
        assert_eq!(report.state, RunnerState::Failed);
        assert!(matches!(report.result, Err(ActionError::UnknownOperation(_))));
    }

    #[tokio::test]
    async fn operation_error_is_captured() {
        let registry = registry_with(echo_meta("a").with_handler(Arc::new(FailingHandler))).await;
        let report = ActionRunner::new(request("c1", "n1", "n1"), registry, scopes())
            .run()
            .await;

        assert_eq!(report.state, RunnerState::Failed);
        assert!(report.transitions.contains(&RunnerState::Executing));
        assert_eq!(report.result, Err(ActionError::operation("boom")));
    }

    #[test]
    fn terminal_states() {
        assert!(RunnerState::Completed.is_terminal());
        assert!(RunnerState::Denied.is_terminal());
        assert!(RunnerState::Failed.is_terminal());
        assert!(!RunnerState::Executing.is_terminal());
    }
}
