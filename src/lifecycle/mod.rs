//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Telemetry → Router → Listener bound → ShutdownOrchestrator
//!
//! Running:
//!     every request, background subtask and the telemetry drain
//!     → tracker.rs (register on start, release on every exit path)
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → root CancelToken (first one wins)
//!
//! Shutdown (shutdown.rs):
//!     root triggered → Listener drained within grace
//!     → tracker reaches zero within the overall timeout → exit code
//! ```
//!
//! # Design Decisions
//! - One tracker per process, passed by handle; no global
//! - Every wait has an upper bound
//! - Timeouts are reported, not retried; violations fail the exit status

pub mod cancel;
pub mod shutdown;
pub mod signals;
pub mod startup;
pub mod tracker;

pub use cancel::CancelToken;
pub use shutdown::{ShutdownOrchestrator, ShutdownPhase, ShutdownReport, ShutdownSettings};
pub use startup::{start, start_with, start_with_signer, StartupError};
pub use tracker::{TaskGuard, TaskKind, TaskTracker, TrackerError};
