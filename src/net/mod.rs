//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, one task per connection)
//!     → Hand off to the HTTP router
//!
//! Listener States:
//!     Stopped → Starting → Running → Draining → StoppedFinal
//! ```
//!
//! # Design Decisions
//! - The socket closes as soon as draining starts
//! - Connections belong to the serve task so a forced stop aborts them

pub mod listener;

pub use listener::{DrainOutcome, Listener, ListenerError, ListenerState};
