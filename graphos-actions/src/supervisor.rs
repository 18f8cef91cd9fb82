use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use graphos_core::action::ExecutionRequest;
use graphos_core::config::RunnerConfig;
use graphos_core::error::ActionError;
use graphos_core::scope::ScopeService;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::pid_store::{PidStore, RunnerHandle};
use crate::registry::ActionRegistry;
use crate::runner::{ActionRunner, RunReport, RunnerState};

/// Counters exposed on the health endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SupervisorStats {
    pub started: u64,
    pub completed: u64,
    pub denied: u64,
    pub failed: u64,
    pub crashed: u64,
    pub stopped: u64,
    pub running: usize,
    pub degraded: bool,
}

/// Result of `stop_runner`. Both variants are success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    NotRunning,
}

/// Crash timestamps within a sliding window. More than `max_crashes`
/// crashes inside `window` marks the supervisor degraded.
#[derive(Debug)]
struct CrashWindow {
    timestamps: Vec<DateTime<Utc>>,
    max_crashes: u32,
    window: Duration,
    degraded: bool,
}

impl CrashWindow {
    fn new(max_crashes: u32, window: Duration) -> Self {
        Self {
            timestamps: Vec::new(),
            max_crashes,
            window,
            degraded: false,
        }
    }

    fn record(&mut self, now: DateTime<Utc>) -> bool {
        let window = chrono::Duration::from_std(self.window).unwrap_or(chrono::Duration::minutes(1));
        self.timestamps.retain(|t| now - *t < window);
        self.timestamps.push(now);
        if self.timestamps.len() > self.max_crashes as usize {
            self.degraded = true;
        }
        self.degraded
    }

    fn refresh(&mut self, now: DateTime<Utc>) {
        let window = chrono::Duration::from_std(self.window).unwrap_or(chrono::Duration::minutes(1));
        self.timestamps.retain(|t| now - *t < window);
        if self.timestamps.len() <= self.max_crashes as usize {
            self.degraded = false;
        }
    }
}

#[derive(Debug)]
struct SupervisorState {
    stats: SupervisorStats,
    crashes: CrashWindow,
}

/// How a runner task ended.
#[derive(Debug)]
enum RunnerExit {
    Finished(RunReport),
    Crashed(String),
}

/// A started execution. Awaiting it yields the runner's terminal result;
/// dropping it leaves the runner running and reachable via the PID store.
#[derive(Debug)]
pub struct RunningExecution {
    pub handle: RunnerHandle,
    join: JoinHandle<RunnerExit>,
}

impl RunningExecution {
    pub fn execution_id(&self) -> &str {
        &self.handle.execution_id
    }

    pub async fn wait(self) -> Result<serde_json::Value, ActionError> {
        match self.join.await {
            Ok(RunnerExit::Finished(report)) => report.result,
            Ok(RunnerExit::Crashed(message)) => Err(ActionError::UnexpectedFailure(message)),
            Err(err) if err.is_cancelled() => Err(ActionError::operation(format!(
                "execution {} was stopped",
                self.handle.execution_id
            ))),
            Err(err) => Err(ActionError::UnexpectedFailure(err.to_string())),
        }
    }
}

/// Removes the PID store entry when the runner task ends, including when
/// the task is aborted.
struct PidGuard {
    pids: PidStore,
    execution_id: String,
    generation: u64,
}

impl Drop for PidGuard {
    fn drop(&mut self) {
        self.pids.delete_generation(&self.execution_id, self.generation);
    }
}

/// Starts one isolated runner task per execution request and tracks it in
/// the PID store. A crashing runner affects only its own execution; the
/// request is never re-run.
pub struct RunnerSupervisor {
    registry: Arc<ActionRegistry>,
    scope_service: Arc<dyn ScopeService>,
    pids: PidStore,
    state: Arc<Mutex<SupervisorState>>,
    generation: AtomicU64,
}

impl RunnerSupervisor {
    pub fn new(
        registry: Arc<ActionRegistry>,
        scope_service: Arc<dyn ScopeService>,
        config: &RunnerConfig,
    ) -> Self {
        Self {
            registry,
            scope_service,
            pids: PidStore::new(),
            state: Arc::new(Mutex::new(SupervisorState {
                stats: SupervisorStats::default(),
                crashes: CrashWindow::new(config.max_restarts, config.restart_window),
            })),
            generation: AtomicU64::new(0),
        }
    }

    pub fn pid_store(&self) -> &PidStore {
        &self.pids
    }

    pub fn registry(&self) -> &Arc<ActionRegistry> {
        &self.registry
    }

    /// Spawn a runner for `request`. The PID store entry exists before the
    /// runner makes its first transition.
    pub fn start_runner(&self, request: ExecutionRequest) -> Result<RunningExecution, ActionError> {
        let execution_id = request.execution_id.clone();
        if self.pids.contains(&execution_id) {
            return Err(ActionError::payload(format!(
                "execution {execution_id} is already running"
            )));
        }

        let key = request.key();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let runner = ActionRunner::new(request, self.registry.clone(), self.scope_service.clone());
        let (go_tx, go_rx) = oneshot::channel::<()>();
        let guard = PidGuard {
            pids: self.pids.clone(),
            execution_id: execution_id.clone(),
            generation,
        };
        let state = self.state.clone();
        let task_execution_id = execution_id.clone();

        let join = tokio::spawn(async move {
            let _guard = guard;
            if go_rx.await.is_err() {
                return RunnerExit::Crashed("runner start signal dropped".to_string());
            }
            match AssertUnwindSafe(runner.run()).catch_unwind().await {
                Ok(report) => {
                    record_finished(&state, report.state);
                    RunnerExit::Finished(report)
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    let degraded = record_crash(&state);
                    tracing::error!(
                        execution_id = %task_execution_id,
                        panic = %message,
                        degraded,
                        "runner_crashed"
                    );
                    RunnerExit::Crashed(format!("runner crashed: {message}"))
                }
            }
        });

        let handle = RunnerHandle::new(execution_id.clone(), key.clone(), generation, join.abort_handle());
        self.pids.put(&execution_id, handle.clone());
        if let Ok(mut state) = self.state.lock() {
            state.stats.started += 1;
        }
        tracing::debug!(execution_id = %execution_id, action = %key, "runner_started");
        // The receiver lives until the task polls it; a send error means the
        // task already ended.
        let _ = go_tx.send(());

        Ok(RunningExecution { handle, join })
    }

    /// Abort the runner serving `execution_id` and drop its PID store entry.
    /// Stopping an unknown or finished execution succeeds as `NotRunning`.
    pub fn stop_runner(&self, execution_id: &str) -> StopOutcome {
        let Some(handle) = self.pids.delete(execution_id) else {
            return StopOutcome::NotRunning;
        };
        handle.terminate();
        if let Ok(mut state) = self.state.lock() {
            state.stats.stopped += 1;
        }
        tracing::info!(execution_id = %execution_id, action = %handle.key, "runner_stopped");
        StopOutcome::Stopped
    }

    pub fn stats(&self) -> SupervisorStats {
        let mut stats = match self.state.lock() {
            Ok(mut state) => {
                state.crashes.refresh(Utc::now());
                let mut stats = state.stats.clone();
                stats.degraded = state.crashes.degraded;
                stats
            }
            Err(_) => SupervisorStats {
                degraded: true,
                ..SupervisorStats::default()
            },
        };
        stats.running = self.pids.len();
        stats
    }

    pub fn is_degraded(&self) -> bool {
        self.stats().degraded
    }

    /// Abort every live runner.
    pub fn shutdown(&self) -> usize {
        let handles = self.pids.drain();
        for handle in &handles {
            handle.terminate();
        }
        if !handles.is_empty() {
            tracing::info!(count = handles.len(), "supervisor_shutdown_aborted_runners");
        }
        handles.len()
    }
}

fn record_finished(state: &Mutex<SupervisorState>, terminal: RunnerState) {
    let Ok(mut state) = state.lock() else {
        return;
    };
    match terminal {
        RunnerState::Completed => state.stats.completed += 1,
        RunnerState::Denied => state.stats.denied += 1,
        _ => state.stats.failed += 1,
    }
}

fn record_crash(state: &Mutex<SupervisorState>) -> bool {
    let Ok(mut state) = state.lock() else {
        return true;
    };
    state.stats.crashed += 1;
    state.crashes.record(Utc::now())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
