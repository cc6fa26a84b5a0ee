// src/shutdown.rs

//! Process-wide cancellation on SIGINT/SIGTERM
//!
//! The first signal cancels the shared token and lets every task unwind.
//! A second one exits immediately.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Exit status used when a second interrupt forces termination
pub const EXIT_INTERRUPTED: i32 = 130;

/// Spawn a task that cancels `token` on the first interrupt
pub fn install_interrupt_handler(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        if wait_for_signal().await.is_err() {
            return;
        }
        warn!("Interrupted, finishing up. Interrupt again to exit immediately.");
        token.cancel();

        if wait_for_signal().await.is_ok() {
            std::process::exit(EXIT_INTERRUPTED);
        }
    })
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = interrupt.recv() => {}
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
