use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::watch;
use tracing::{error, info, warn};

use graphos_core::config::GraphosConfig;

/// Load and deserialize config from a TOML file.
pub fn load_config(path: &Path) -> Result<GraphosConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading config: {}", path.display()))?;
    let config: GraphosConfig =
        toml::from_str(&content).with_context(|| format!("parsing config: {}", path.display()))?;
    Ok(config)
}

/// Load, then validate.
pub fn load_validated(path: &Path) -> Result<GraphosConfig> {
    let config = load_config(path)?;
    validate_config(&config)?;
    Ok(config)
}

/// Validate config for internal consistency:
/// - `bind_addr` parses as a socket address
/// - timeouts are non-zero and `max_restarts` is at least one
/// - every grant names an actor and only non-empty scope patterns
pub fn validate_config(config: &GraphosConfig) -> Result<()> {
    if config.global.instance_id.trim().is_empty() {
        anyhow::bail!("global.instance_id must not be empty");
    }

    config
        .server
        .bind_addr
        .parse::<SocketAddr>()
        .with_context(|| format!("server.bind_addr '{}' is not a socket address", config.server.bind_addr))?;

    if config.server.session_idle_timeout.is_zero() {
        anyhow::bail!("server.session_idle_timeout must be greater than zero");
    }
    if let Some(secret) = &config.server.rpc_secret
        && secret.trim().is_empty()
    {
        anyhow::bail!("server.rpc_secret must not be blank when set");
    }

    let runner = &config.runner;
    for (name, value) in [
        ("runner.execution_timeout", runner.execution_timeout),
        ("runner.script_timeout", runner.script_timeout),
        ("runner.restart_window", runner.restart_window),
    ] {
        if value.is_zero() {
            anyhow::bail!("{name} must be greater than zero");
        }
    }
    if runner.max_restarts == 0 {
        anyhow::bail!("runner.max_restarts must be at least 1");
    }

    let mut actors = HashSet::new();
    for grant in &config.grants {
        if grant.actor.trim().is_empty() {
            anyhow::bail!("grant with empty actor");
        }
        if grant.scopes.iter().any(|scope| scope.trim().is_empty()) {
            anyhow::bail!("grant for actor '{}' has an empty scope pattern", grant.actor);
        }
        if !actors.insert(grant.actor.as_str()) {
            warn!(actor = %grant.actor, "grants for actor are split across entries; they are merged");
        }
    }

    info!("config validation passed");
    Ok(())
}

/// Spawn a file watcher that sends updated configs on a watch channel when the file changes.
/// Returns the watcher (must be kept alive) and the watch receiver.
pub fn spawn_config_watcher(
    path: &Path,
) -> Result<(RecommendedWatcher, watch::Receiver<Arc<GraphosConfig>>)> {
    let initial = load_validated(path)?;
    let (tx, rx) = watch::channel(Arc::new(initial));

    let watched_path = path.to_path_buf();
    let mut watcher =
        notify::recommended_watcher(move |res: Result<Event, notify::Error>| match res {
            Ok(event) => {
                if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    info!("config file changed, reloading");
                    match load_validated(&watched_path) {
                        Ok(new_config) => {
                            if tx.send(Arc::new(new_config)).is_err() {
                                warn!("config watch channel closed");
                            }
                            info!("config reloaded successfully");
                        }
                        Err(e) => {
                            error!("new config rejected, keeping old config: {e:#}");
                        }
                    }
                }
            }
            Err(e) => {
                error!("config file watcher error: {e}");
            }
        })?;

    watcher.watch(path, RecursiveMode::NonRecursive)?;

    Ok((watcher, rx))
}
