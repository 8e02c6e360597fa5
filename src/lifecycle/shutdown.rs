//! Shutdown orchestration.
//!
//! # Sequence
//! ```text
//! Idle
//!   → root token triggered (signal or caller), or a tracker violation
//! CancelTriggered
//!   → telemetry drain registered as tracked work
//!   → listener stops accepting, drains within the grace period
//! Draining
//!   → wait for the tracker to reach zero within what is left of the overall timeout
//! Terminated
//! ```
//!
//! # Design Decisions
//! - Both bounds hang off a fresh token created at shutdown, not off the root:
//!   the root is already triggered by then
//! - The grace token is derived from the overall one, so the listener can
//!   never outlive the overall timeout
//! - The tracker is only waited on after the listener is confirmed stopped;
//!   no request can register after that point
//! - Timeouts are reported with the per-kind breakdown, never retried

use std::time::Duration;
use tokio::time::Instant;

use crate::lifecycle::cancel::CancelToken;
use crate::lifecycle::tracker::{TaskKind, TaskTracker, TrackerError};
use crate::net::listener::{DrainOutcome, Listener};
use crate::observability::telemetry::TelemetryHandle;

/// Exit status for a clean shutdown.
pub const EXIT_CLEAN: u8 = 0;
/// Exit status for startup failures and lifecycle invariant violations.
pub const EXIT_FAILURE: u8 = 1;
/// Exit status when the shutdown deadline forced termination.
pub const EXIT_FORCED: u8 = 2;

/// Orchestrator state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    Idle,
    CancelTriggered,
    Draining,
    Terminated,
}

/// Shutdown bounds.
#[derive(Debug, Clone, Copy)]
pub struct ShutdownSettings {
    /// Listener drain bound.
    pub grace: Duration,
    /// Bound on the whole sequence, listener drain included.
    pub overall: Duration,
}

/// What happened during shutdown.
#[derive(Debug)]
pub struct ShutdownReport {
    pub listener: DrainOutcome,
    pub tasks: Result<(), TrackerError>,
    pub elapsed: Duration,
}

impl ShutdownReport {
    /// Every connection and tracked task finished in time.
    pub fn is_clean(&self) -> bool {
        self.listener != DrainOutcome::Forced && self.tasks.is_ok()
    }

    pub fn exit_code(&self) -> u8 {
        match &self.tasks {
            Err(e) if e.is_violation() => EXIT_FAILURE,
            Err(_) => EXIT_FORCED,
            Ok(()) if self.listener == DrainOutcome::Forced => EXIT_FORCED,
            Ok(()) => EXIT_CLEAN,
        }
    }
}

/// Owns the running service and takes it down in order.
pub struct ShutdownOrchestrator {
    listener: Listener,
    tracker: TaskTracker,
    root: CancelToken,
    telemetry: Option<TelemetryHandle>,
    settings: ShutdownSettings,
    phase: ShutdownPhase,
}

impl ShutdownOrchestrator {
    pub fn new(
        listener: Listener,
        tracker: TaskTracker,
        root: CancelToken,
        telemetry: Option<TelemetryHandle>,
        settings: ShutdownSettings,
    ) -> Self {
        Self {
            listener,
            tracker,
            root,
            telemetry,
            settings,
            phase: ShutdownPhase::Idle,
        }
    }

    pub fn phase(&self) -> ShutdownPhase {
        self.phase
    }

    /// The root token. Triggering it starts shutdown.
    pub fn root(&self) -> &CancelToken {
        &self.root
    }

    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until the root token triggers or the tracker records a
    /// violation, then shut down.
    pub async fn run(mut self) -> ShutdownReport {
        tokio::select! {
            _ = self.root.triggered() => {}
            _ = self.tracker.violated() => {
                tracing::error!(
                    outstanding = %self.tracker.outstanding(),
                    "Task accounting violated, shutting down"
                );
            }
        }
        self.shutdown().await
    }

    /// Run the shutdown sequence now. Calling it again after it finished
    /// returns an empty report.
    pub async fn shutdown(&mut self) -> ShutdownReport {
        let started = Instant::now();
        if self.phase == ShutdownPhase::Terminated {
            return ShutdownReport {
                listener: DrainOutcome::NotRunning,
                tasks: Ok(()),
                elapsed: Duration::ZERO,
            };
        }

        if self.root.trigger() {
            tracing::info!("Shutdown requested");
        }
        self.phase = ShutdownPhase::CancelTriggered;
        tracing::info!(
            grace = ?self.settings.grace,
            timeout = ?self.settings.overall,
            outstanding = %self.tracker.outstanding(),
            "Starting graceful shutdown"
        );

        let deadline = CancelToken::new().derive_with_timeout(self.settings.overall);
        let grace = deadline.derive_with_timeout(self.settings.grace);

        if let Some(telemetry) = self.telemetry.take() {
            self.spawn_telemetry_drain(telemetry, deadline.clone());
        }

        let listener = self.listener.stop_graceful(&grace).await;

        self.phase = ShutdownPhase::Draining;
        let remaining = deadline.remaining().unwrap_or(Duration::ZERO);
        tracing::debug!(
            remaining = ?remaining,
            outstanding = %self.tracker.outstanding(),
            "Waiting for outstanding tasks"
        );
        let tasks = self.tracker.wait_until_zero(remaining).await;

        match &tasks {
            Ok(()) => tracing::info!("All tasks finished"),
            Err(TrackerError::Timeout { outstanding, .. }) => {
                for (kind, count) in outstanding.pending() {
                    tracing::error!(kind = %kind, count, "Tasks did not finish before the shutdown timeout");
                }
                tracing::error!("Forcing exit with work still outstanding");
            }
            Err(e) => tracing::error!(error = %e, "Shutdown aborted by lifecycle violation"),
        }

        self.phase = ShutdownPhase::Terminated;
        let report = ShutdownReport {
            listener,
            tasks,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            elapsed = ?report.elapsed,
            clean = report.is_clean(),
            "Shutdown complete"
        );
        report
    }

    /// Drain telemetry as tracked work, after everything that still produces spans.
    fn spawn_telemetry_drain(&self, telemetry: TelemetryHandle, deadline: CancelToken) {
        let guard = self.tracker.register(TaskKind::Telemetry);
        let tracker = self.tracker.clone();
        tokio::spawn(async move {
            if let Err(e) = tracker
                .wait_until_idle_except(TaskKind::Telemetry, &deadline)
                .await
            {
                tracing::warn!(error = %e, "Flushing telemetry before other work finished");
            }
            telemetry.shutdown().await;
            drop(guard);
        });
    }
}
