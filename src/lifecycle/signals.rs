//! OS signal handling.
//!
//! # Responsibilities
//! - Register SIGTERM/SIGINT handlers (ctrl-c elsewhere)
//! - Forward every signal to the root cancellation token
//!
//! # Design Decisions
//! - Handlers are installed before the forwarding task is spawned, so an
//!   installation failure is a startup error rather than a lost signal
//! - Only the first signal starts shutdown; later ones are logged no-ops

use tokio::task::JoinHandle;

use crate::lifecycle::cancel::CancelToken;

/// Forward termination signals to `root` for the life of the process.
pub fn forward_termination_signals(root: CancelToken) -> std::io::Result<JoinHandle<()>> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        Ok(tokio::spawn(async move {
            loop {
                let name = tokio::select! {
                    received = sigterm.recv() => match received {
                        Some(()) => "SIGTERM",
                        None => break,
                    },
                    received = sigint.recv() => match received {
                        Some(()) => "SIGINT",
                        None => break,
                    },
                };
                on_signal(&root, name);
            }
        }))
    }

    #[cfg(not(unix))]
    {
        Ok(tokio::spawn(async move {
            loop {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "Unable to listen for shutdown signal");
                    break;
                }
                on_signal(&root, "ctrl-c");
            }
        }))
    }
}

fn on_signal(root: &CancelToken, name: &'static str) {
    if root.trigger() {
        tracing::warn!(signal = name, "Termination signal received, attempting graceful exit");
    } else {
        tracing::warn!(signal = name, "Shutdown already in progress, ignoring signal");
    }
}
