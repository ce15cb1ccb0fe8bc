//! Shutdown fan-out from OS signals to the long-running tasks.

use std::future::Future;

use tokio::sync::broadcast;

/// One receiver per task that must observe shutdown.
pub struct ShutdownReceivers {
    pub session: broadcast::Receiver<()>,
    pub worker: broadcast::Receiver<()>,
}

/// Subscribe every receiver, then spawn a task that broadcasts once
/// `signal` resolves. A signal that lands while the daemon is still
/// starting up is buffered in each receiver.
pub fn forward_signal<F>(tx: &broadcast::Sender<()>, signal: F) -> ShutdownReceivers
where
    F: Future<Output = ()> + Send + 'static,
{
    let receivers = ShutdownReceivers {
        session: tx.subscribe(),
        worker: tx.subscribe(),
    };

    let tx = tx.clone();
    tokio::spawn(async move {
        signal.await;
        tracing::info!("shutdown signal received");
        let _ = tx.send(());
    });
    receivers
}

/// Ctrl-C, or SIGTERM on unix.
pub async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}
