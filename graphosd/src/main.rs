mod config;
mod rpc;
mod runtime;
mod shutdown;
mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use tokio::io::BufReader;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::runtime::GraphosRuntime;
use crate::telemetry::LogTarget;

const IDLE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// graphosd: action dispatch daemon serving graph tools over JSON-RPC.
#[derive(Parser, Debug)]
#[command(name = "graphosd", version, about)]
struct Cli {
    /// Config file path.
    #[arg(short, long, default_value = "graphos.toml")]
    config: PathBuf,

    /// Increase log verbosity (debug level).
    #[arg(short, long)]
    verbose: bool,

    /// Validate config and exit.
    #[arg(long)]
    validate: bool,

    /// Serve a single session over stdin/stdout instead of HTTP.
    #[arg(long)]
    stdio: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // -----------------------------------------------------------------------
    // 1. Load and validate config
    // -----------------------------------------------------------------------
    let initial_config = config::load_validated(&cli.config)?;

    if cli.validate {
        println!("config is valid");
        return Ok(());
    }

    // -----------------------------------------------------------------------
    // 2. Initialize tracing / OTEL
    // -----------------------------------------------------------------------
    let log_target = if cli.stdio {
        LogTarget::Stderr
    } else {
        LogTarget::Stdout
    };
    let telemetry_guard = telemetry::init_telemetry(&initial_config.otel, cli.verbose, log_target)?;

    info!(
        instance_id = %initial_config.global.instance_id,
        "graphosd starting"
    );

    // -----------------------------------------------------------------------
    // 3. Build the runtime and config watch
    // -----------------------------------------------------------------------
    let runtime = Arc::new(GraphosRuntime::build(&initial_config).await?);

    let (_watcher, mut config_rx) = config::spawn_config_watcher(&cli.config)?;

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let (reload_tx, mut reload_rx) = watch::channel(());

    // -----------------------------------------------------------------------
    // 4. Start the transport
    // -----------------------------------------------------------------------
    let transport_handle = if cli.stdio {
        let server = runtime.server.clone();
        let stdio_shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let reader = BufReader::new(tokio::io::stdin());
            if let Err(e) = graphos_mcp::stdio::serve_session(server, reader, tokio::io::stdout()).await {
                error!("stdio session error: {e}");
            }
            info!("stdio session ended");
            let _ = stdio_shutdown.send(true);
        })
    } else if initial_config.server.enabled {
        let rpc_state = rpc::AppState {
            server: runtime.server.clone(),
            supervisor: runtime.supervisor.clone(),
            start_time: Instant::now(),
            instance_id: initial_config.global.instance_id.clone(),
            rpc_secret: initial_config.server.rpc_secret.clone(),
        };
        let router = rpc::rpc_router(rpc_state);
        let bind_addr = initial_config.server.bind_addr.clone();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(bind = %bind_addr, "JSON-RPC server listening");

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown_rx.changed().await.ok();
                })
                .await
            {
                error!("JSON-RPC server error: {e}");
            }
        })
    } else {
        warn!("server.enabled is false and --stdio not set; no transport is running");
        tokio::spawn(async {})
    };

    // -----------------------------------------------------------------------
    // 5. Spawn signal handler
    // -----------------------------------------------------------------------
    tokio::spawn(shutdown::signal_listener(shutdown_tx.clone(), reload_tx));

    // -----------------------------------------------------------------------
    // 6. Main loop
    // -----------------------------------------------------------------------
    let mut shutdown_watch = shutdown_tx.subscribe();
    let mut idle_timeout = initial_config.server.session_idle_timeout;
    let mut sweep = tokio::time::interval(IDLE_SWEEP_INTERVAL);
    sweep.tick().await;

    info!("entering main loop");
    loop {
        tokio::select! {
            _ = shutdown_watch.changed() => {
                if *shutdown_watch.borrow() {
                    info!("shutdown signal received, beginning graceful shutdown");
                    break;
                }
            }
            Ok(()) = config_rx.changed() => {
                let new_config = config_rx.borrow().clone();
                info!("applying hot-reloaded config");
                runtime.apply_config(&new_config);
                idle_timeout = new_config.server.session_idle_timeout;
            }
            Ok(()) = reload_rx.changed() => {
                match config::load_validated(&cli.config) {
                    Ok(new_config) => {
                        info!("SIGHUP reload applied");
                        runtime.apply_config(&new_config);
                        idle_timeout = new_config.server.session_idle_timeout;
                    }
                    Err(e) => error!("SIGHUP reload rejected, keeping old config: {e:#}"),
                }
            }
            _ = sweep.tick() => {
                let closed = runtime.server.sweep_idle(idle_timeout).await;
                if closed > 0 {
                    info!(closed, "idle sessions closed");
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // 7. Graceful shutdown
    // -----------------------------------------------------------------------
    info!("graceful shutdown: stopping sessions and runners");
    let stopped = runtime.shutdown().await;
    if stopped > 0 {
        warn!(stopped, "in-flight runners stopped during shutdown");
    }

    if cli.stdio {
        // stdin reads block until the peer closes; do not wait on them.
        transport_handle.abort();
    } else {
        info!("graceful shutdown: stopping JSON-RPC server");
        let _ = transport_handle.await;
    }

    info!("graceful shutdown: flushing OTEL spans");
    telemetry_guard.flush();

    info!("graphosd stopped");

    Ok(())
}
