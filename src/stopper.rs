use anyhow::Result;
use tokio::{
    select,
    signal::ctrl_c,
    task::{self, JoinHandle},
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

#[cfg(unix)]
async fn sigterm_listener() -> Result<()> {
    let mut stream = signal(SignalKind::terminate())?;
    stream.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn sigterm_listener() -> Result<()> {
    std::future::pending::<()>().await;
    Ok(())
}

/// Cancels `cancel_token` on Ctrl+C or SIGTERM. Every other task exits on
/// the same token, so this is the single shutdown trigger.
pub fn run(cancel_token: CancellationToken) -> Result<JoinHandle<()>> {
    Ok(task::spawn(async move {
        select! {
            _ = cancel_token.cancelled() => warn!("Cancelled"),
            _ = ctrl_c() => warn!("Ctrl+C received"),
            res = sigterm_listener() => match res {
                Ok(()) => warn!("SIGTERM received"),
                Err(e) => warn!("Failed to listen for SIGTERM: {}", e),
            },
        };
        info!("Initiating shutdown");
        cancel_token.cancel();
        info!("Exited");
    }))
}
