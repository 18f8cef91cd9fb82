use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use graphos_actions::executable::ExecutableRuntime;
use graphos_actions::graph_actions::register_graph_actions;
use graphos_actions::{ActionDispatcher, ActionRegistry, GrantTable, RunnerSupervisor};
use graphos_core::config::GraphosConfig;
use graphos_core::graph::GraphStore;
use graphos_mcp::{SessionServer, SessionServerConfig};
use graphos_store_memory::InMemoryGraphStore;

/// Everything the daemon serves from, built once from the initial config.
pub struct GraphosRuntime {
    pub store: Arc<dyn GraphStore>,
    pub grants: Arc<GrantTable>,
    pub supervisor: Arc<RunnerSupervisor>,
    pub server: Arc<SessionServer>,
}

impl GraphosRuntime {
    pub async fn build(config: &GraphosConfig) -> Result<Self> {
        let store: Arc<dyn GraphStore> = Arc::new(InMemoryGraphStore::new());
        let registry = Arc::new(ActionRegistry::new());
        register_graph_actions(
            &registry,
            store.clone(),
            ExecutableRuntime::new(config.runner.script_timeout),
        )
        .await
        .context("registering graph actions")?;

        let grants = Arc::new(GrantTable::from_config(&config.grants));
        let supervisor = Arc::new(RunnerSupervisor::new(
            registry.clone(),
            grants.clone(),
            &config.runner,
        ));
        let dispatcher = Arc::new(ActionDispatcher::new(
            supervisor.clone(),
            store.clone(),
            config.runner.execution_timeout,
        ));
        let server = Arc::new(SessionServer::new(
            SessionServerConfig {
                server_name: config.server.server_name.clone(),
                ..SessionServerConfig::default()
            },
            dispatcher,
        ));

        info!(
            actions = registry.len().await,
            grants = config.grants.len(),
            "runtime_initialized"
        );

        Ok(Self {
            store,
            grants,
            supervisor,
            server,
        })
    }

    /// Apply the hot-reloadable parts of a new config. Runner and server
    /// settings take effect on restart.
    pub fn apply_config(&self, config: &GraphosConfig) {
        self.grants.replace(&config.grants);
    }

    /// Stop sessions, then every in-flight runner. Returns the number of runners stopped.
    pub async fn shutdown(&self) -> usize {
        self.server.shutdown().await;
        self.supervisor.shutdown()
    }
}
