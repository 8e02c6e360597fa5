//! Monotonic cancellation with parent/child derivation and deadlines.
//!
//! # Responsibilities
//! - Fire exactly once and stay fired (no re-arming)
//! - Propagate a parent trigger to every descendant
//! - Compose a grace period with the parent signal via `derive_with_timeout`
//!
//! # Design Decisions
//! - Propagation is delegated to `tokio_util`'s `CancellationToken` tree
//! - A deadline is a property of the token, not a spawned timer task, so an
//!   expired child triggers only itself and its descendants
//! - Uses `tokio::time::Instant` so paused-clock tests observe deadlines

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation signal observed by every long-running loop.
#[derive(Debug, Clone)]
pub struct CancelToken {
    inner: CancellationToken,
    /// Set by the first explicit `trigger` on this token.
    fired: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    /// Create a new root token with no deadline.
    pub fn new() -> Self {
        Self {
            inner: CancellationToken::new(),
            fired: Arc::new(AtomicBool::new(false)),
            deadline: None,
        }
    }

    /// Trigger the token and all of its descendants.
    ///
    /// Returns `true` only for the call that actually fired it; later calls
    /// are no-ops and return `false`.
    pub fn trigger(&self) -> bool {
        let first = !self.fired.swap(true, Ordering::SeqCst);
        self.inner.cancel();
        first
    }

    /// Non-blocking read of the trigger state.
    pub fn is_triggered(&self) -> bool {
        self.inner.is_cancelled() || self.deadline_elapsed()
    }

    /// Wait until the token is triggered, by its parent, by `trigger`, or by
    /// its own deadline. Completes immediately once triggered.
    pub async fn triggered(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.inner.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.inner.cancelled().await,
        }
    }

    /// Derive a child that triggers when this token does or when `timeout`
    /// elapses, whichever comes first.
    pub fn derive_with_timeout(&self, timeout: Duration) -> Self {
        let own = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(inherited) => inherited.min(own),
            None => own,
        };
        Self {
            inner: self.inner.child_token(),
            fired: Arc::new(AtomicBool::new(false)),
            deadline: Some(deadline),
        }
    }

    /// The instant at which this token triggers on its own, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline. `None` means no deadline; a triggered
    /// token reports `Duration::ZERO`.
    pub fn remaining(&self) -> Option<Duration> {
        if self.inner.is_cancelled() {
            return Some(Duration::ZERO);
        }
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    fn deadline_elapsed(&self) -> bool {
        self.deadline
            .map(|deadline| Instant::now() >= deadline)
            .unwrap_or(false)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
