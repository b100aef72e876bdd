/// Signal handling for graceful shutdown.
///
/// First SIGINT (Ctrl-C) or SIGTERM: flip the stop channel so the watch loop
/// exits before its next poll. Second signal: exit immediately, even if a
/// read or send is still in flight.
use tokio::sync::watch;

/// Install the handlers and return the stop channel the watch loop listens on.
///
/// If the handlers cannot be installed the sender is dropped, which the loop
/// treats as "never stop".
pub fn install() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = wait_for_signal().await {
            tracing::warn!(error = %e, "failed to install signal handlers");
            return;
        }
        tracing::warn!("shutdown requested, stopping before the next poll (signal again to exit now)");
        let _ = tx.send(true);

        if wait_for_signal().await.is_ok() {
            tracing::warn!("second signal received, exiting immediately");
            std::process::exit(crate::EXIT_STOPPED);
        }
    });
    rx
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res,
        _ = term.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
