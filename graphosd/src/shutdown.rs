use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tracing::{error, info};

/// Listen for OS signals and dispatch to the appropriate channel.
///
/// - SIGTERM / SIGINT -> sends on `shutdown_tx`
/// - SIGHUP -> sends on `reload_tx`
pub async fn signal_listener(shutdown_tx: watch::Sender<bool>, reload_tx: watch::Sender<()>) {
    let (mut sigterm, mut sigint, mut sighup) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
        signal(SignalKind::hangup()),
    ) {
        (Ok(term), Ok(int), Ok(hup)) => (term, int, hup),
        (term, int, hup) => {
            let err = [term.err(), int.err(), hup.err()]
                .into_iter()
                .flatten()
                .map(|err| err.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            error!(error = %err, "signal_handler_registration_failed");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("received SIGTERM, initiating graceful shutdown");
                let _ = shutdown_tx.send(true);
                return;
            }
            _ = sigint.recv() => {
                info!("received SIGINT, initiating graceful shutdown");
                let _ = shutdown_tx.send(true);
                return;
            }
            _ = sighup.recv() => {
                info!("received SIGHUP, triggering config reload");
                let _ = reload_tx.send(());
            }
        }
    }
}
