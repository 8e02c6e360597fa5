//! Outstanding-work accounting for graceful shutdown.
//!
//! # Responsibilities
//! - Count every in-flight unit of work, broken down by category
//! - Release registrations on every exit path via `TaskGuard`
//! - Let the shutdown path wait for zero with an upper bound
//! - Surface releases without a matching registration
//!
//! # Design Decisions
//! - One tracker per process, passed by handle (cheap `Clone`), no global
//! - Counts live in a watch channel so waiters wake on change, never poll
//! - A bad release is refused, never clamped, and poisons the tracker so
//!   the final wait reports it

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

use crate::lifecycle::cancel::CancelToken;
use crate::observability::metrics;

/// Category of tracked work, used for shutdown diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// The HTTP listener's serve loop.
    Listener,
    /// A request being handled by the pipeline.
    Request,
    /// Work detached from a request that must finish before exit.
    Background,
    /// Telemetry exporter drain.
    Telemetry,
}

impl TaskKind {
    pub const ALL: [TaskKind; 4] = [
        TaskKind::Listener,
        TaskKind::Request,
        TaskKind::Background,
        TaskKind::Telemetry,
    ];

    fn index(self) -> usize {
        match self {
            TaskKind::Listener => 0,
            TaskKind::Request => 1,
            TaskKind::Background => 2,
            TaskKind::Telemetry => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Listener => "listener",
            TaskKind::Request => "request",
            TaskKind::Background => "background",
            TaskKind::Telemetry => "telemetry",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of outstanding work per category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Outstanding {
    counts: [usize; 4],
    violations: usize,
}

impl Outstanding {
    /// Outstanding units of the given kind.
    pub fn get(&self, kind: TaskKind) -> usize {
        self.counts[kind.index()]
    }

    /// Outstanding units across all kinds.
    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    /// Outstanding units across all kinds except `kind`.
    pub fn total_except(&self, kind: TaskKind) -> usize {
        self.total() - self.get(kind)
    }

    /// Kinds that still have work in flight, with their counts.
    pub fn pending(&self) -> Vec<(TaskKind, usize)> {
        TaskKind::ALL
            .iter()
            .map(|kind| (*kind, self.get(*kind)))
            .filter(|(_, count)| *count > 0)
            .collect()
    }

    /// Number of releases refused because nothing was registered.
    pub fn violations(&self) -> usize {
        self.violations
    }
}

impl fmt::Display for Outstanding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pending = self.pending();
        if pending.is_empty() {
            return f.write_str("none");
        }
        for (i, (kind, count)) in pending.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", kind, count)?;
        }
        Ok(())
    }
}

/// Errors reported by the task tracker.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TrackerError {
    /// `release` was called without a matching registration.
    #[error("lifecycle invariant violated: {kind} task released without a matching register")]
    Underflow { kind: TaskKind },

    /// The wait bound elapsed with work still in flight.
    #[error("timed out after {waited:?} waiting for outstanding tasks ({outstanding})")]
    Timeout {
        waited: Duration,
        outstanding: Outstanding,
    },

    /// A previous release violated the lifecycle invariant.
    #[error("lifecycle invariant violated: {violations} unmatched release(s) recorded")]
    Poisoned { violations: usize },
}

impl TrackerError {
    /// True for the lifecycle-violation variants, which must fail the process.
    pub fn is_violation(&self) -> bool {
        matches!(
            self,
            TrackerError::Underflow { .. } | TrackerError::Poisoned { .. }
        )
    }
}

#[derive(Debug)]
struct Inner {
    counts: watch::Sender<Outstanding>,
}

/// Process-wide counter of outstanding work.
#[derive(Debug, Clone)]
pub struct TaskTracker {
    inner: Arc<Inner>,
}

impl TaskTracker {
    /// Create a tracker with nothing outstanding.
    pub fn new() -> Self {
        let (counts, _) = watch::channel(Outstanding::default());
        Self {
            inner: Arc::new(Inner { counts }),
        }
    }

    /// Register a unit of work and return a guard that releases it on drop.
    ///
    /// Must be called before the work starts.
    pub fn register(&self, kind: TaskKind) -> TaskGuard {
        self.acquire(kind);
        TaskGuard {
            tracker: self.clone(),
            kind,
            released: false,
        }
    }

    /// Raw increment for callers that cannot hold a `TaskGuard`.
    pub fn acquire(&self, kind: TaskKind) {
        let mut total = 0;
        self.inner.counts.send_modify(|counts| {
            counts.counts[kind.index()] += 1;
            total = counts.total();
            metrics::record_outstanding(kind, counts.get(kind));
        });
        tracing::trace!(kind = %kind, outstanding = total, "Task registered");
    }

    /// Raw decrement, exactly once per `acquire`.
    ///
    /// A release with nothing registered for `kind` is refused: the counter
    /// is left untouched, the violation is logged and recorded, and every
    /// later wait fails with `TrackerError::Poisoned`.
    pub fn release(&self, kind: TaskKind) -> Result<(), TrackerError> {
        let mut underflow = false;
        let mut now = 0;
        self.inner.counts.send_modify(|counts| {
            match counts.counts[kind.index()].checked_sub(1) {
                Some(remaining) => {
                    counts.counts[kind.index()] = remaining;
                    now = remaining;
                    metrics::record_outstanding(kind, remaining);
                }
                None => {
                    counts.violations += 1;
                    underflow = true;
                }
            }
        });

        if underflow {
            tracing::error!(
                kind = %kind,
                "Lifecycle invariant violated: release without matching register"
            );
            return Err(TrackerError::Underflow { kind });
        }

        tracing::trace!(kind = %kind, remaining = now, "Task released");
        Ok(())
    }

    /// Current snapshot of outstanding work.
    pub fn outstanding(&self) -> Outstanding {
        *self.inner.counts.borrow()
    }

    /// Resolves once a release has been refused. Never resolves on a
    /// tracker without violations.
    pub async fn violated(&self) {
        let mut rx = self.inner.counts.subscribe();
        let _ = rx.wait_for(|counts| counts.violations > 0).await;
    }

    /// Wait until nothing is outstanding or `timeout` elapses.
    pub async fn wait_until_zero(&self, timeout: Duration) -> Result<(), TrackerError> {
        let wait = self.wait_for(|counts| counts.total() == 0);
        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(self.timeout_error(timeout)),
        }
    }

    /// Wait until everything except `kind` has finished, or `deadline` triggers.
    pub async fn wait_until_idle_except(
        &self,
        kind: TaskKind,
        deadline: &CancelToken,
    ) -> Result<(), TrackerError> {
        let started = tokio::time::Instant::now();
        tokio::select! {
            result = self.wait_for(|counts| counts.total_except(kind) == 0) => result,
            _ = deadline.triggered() => Err(self.timeout_error(started.elapsed())),
        }
    }

    async fn wait_for<F>(&self, mut done: F) -> Result<(), TrackerError>
    where
        F: FnMut(&Outstanding) -> bool,
    {
        let mut rx = self.inner.counts.subscribe();
        // The sender lives in `inner`, which `self` keeps alive, so `wait_for`
        // cannot observe a closed channel.
        let snapshot = match rx
            .wait_for(|counts| counts.violations > 0 || done(counts))
            .await
        {
            Ok(counts) => *counts,
            Err(_) => self.outstanding(),
        };

        if snapshot.violations > 0 {
            return Err(TrackerError::Poisoned {
                violations: snapshot.violations,
            });
        }
        Ok(())
    }

    fn timeout_error(&self, waited: Duration) -> TrackerError {
        let outstanding = self.outstanding();
        if outstanding.violations > 0 {
            return TrackerError::Poisoned {
                violations: outstanding.violations,
            };
        }
        TrackerError::Timeout {
            waited,
            outstanding,
        }
    }
}

impl Default for TaskTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Registration handle that releases its unit of work exactly once.
///
/// Dropping the guard releases it, so panics and aborted futures are covered.
#[derive(Debug)]
#[must_use = "dropping the guard releases the registration immediately"]
pub struct TaskGuard {
    tracker: TaskTracker,
    kind: TaskKind,
    released: bool,
}

impl TaskGuard {
    /// Release the registration now.
    pub fn release(mut self) -> Result<(), TrackerError> {
        self.released = true;
        self.tracker.release(self.kind)
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            // `release` already logs the violation.
            let _ = self.tracker.release(self.kind);
        }
    }
}
