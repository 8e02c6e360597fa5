//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Accepted connection (net::listener)
//!     → server.rs (router, middleware stack)
//!     → request.rs (correlation id set and propagated)
//!     → pipeline.rs (span, tracker registration, RequestContext)
//!     → api handlers
//!     → response.rs (JSON envelopes)
//! ```

pub mod pipeline;
pub mod request;
pub mod response;
pub mod server;

pub use pipeline::{BackgroundSubtask, PipelineState, RequestContext};
pub use request::CORRELATION_ID_HEADER;
pub use response::{ApiError, ApiFailure, ApiSuccess};
pub use server::build_router;
