//! Signal handling for graceful server shutdown.

use tokio::signal;
use tracing::info;

/// Resolves when the process is asked to stop.
///
/// The caller then hands the configured grace period to
/// `RuntimeHost::shutdown_default`, so every match gets its
/// `match_terminate` call before the process exits. Unix listens for SIGINT
/// and SIGTERM; other platforms for Ctrl+C.
pub async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use signal::unix::{signal, SignalKind};

        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;

        let name = tokio::select! {
            _ = interrupt.recv() => "SIGINT",
            _ = terminate.recv() => "SIGTERM",
        };
        info!("📡 Received {}, stopping matches", name);
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        info!("📡 Received Ctrl+C, stopping matches");
    }

    Ok(())
}
