//! OS signal handling for graceful shutdown

use std::future::Future;

use brx_core::prelude::*;
use tokio::sync::watch;

/// Spawn a task that flips the returned receiver to `true` on SIGINT/SIGTERM
pub fn shutdown_signal() -> watch::Receiver<bool> {
    forward_shutdown(wait_for_signal())
}

/// Flip the receiver once `signal` resolves. If the handler cannot be
/// installed the sender stays alive, so only a real signal ends the session.
fn forward_shutdown<F>(signal: F) -> watch::Receiver<bool>
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    let (tx, rx) = watch::channel(false);

    tokio::spawn(async move {
        if let Err(e) = signal.await {
            error!("Signal handler error: {}", e);
            std::future::pending::<()>().await;
        }

        info!("Shutdown signal received");
        let _ = tx.send(true);
    });

    rx
}

/// Wait until `rx` reports shutdown (or its sender is gone)
pub async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

/// Wait for a termination signal
async fn wait_for_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
        }

        Ok(())
    }

    #[cfg(windows)]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
        Ok(())
    }
}
