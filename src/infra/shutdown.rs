//! SIGINT/SIGTERM to a shutdown `watch` channel
//!
//! Both signal streams are registered when `install` returns, so a signal that
//! arrives before the runtime first polls the listener task is still seen.

use std::io;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::info;

/// Register SIGINT and SIGTERM and spawn a task that sends `true` on the
/// first one. Must be called from inside a tokio runtime.
pub fn install() -> io::Result<watch::Receiver<bool>> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        let name = tokio::select! {
            _ = interrupt.recv() => "SIGINT",
            _ = terminate.recv() => "SIGTERM",
        };
        info!(signal = %name, "shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    Ok(shutdown_rx)
}
