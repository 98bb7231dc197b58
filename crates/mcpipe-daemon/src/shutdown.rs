//! Operator shutdown plumbing.
//!
//! Shutdown is a `watch::channel(false)` flipped to `true` once; every
//! long-running component holds a receiver.

use tokio::sync::watch;

/// Resolve once shutdown has been requested.
///
/// A dropped sender never requests shutdown, so this stays pending.
pub async fn requested(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Resolve on Ctrl+C, or SIGTERM on unix.
pub async fn signal() -> std::io::Result<&'static str> {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.map(|()| "SIGINT"),
            _ = sigterm.recv() => Ok("SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.map(|()| "Ctrl+C")
    }
}
