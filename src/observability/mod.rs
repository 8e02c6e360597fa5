//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!     → telemetry.rs (request and handler spans with correlation ids)
//!
//! Consumers:
//!     → stdout (JSON logs, local span dumps)
//!     → Metrics endpoint (Prometheus scrape, optional)
//!     → OTLP collector (remote telemetry, optional)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Correlation id flows through logs and spans
//! - Span export never blocks request handling

pub mod logging;
pub mod metrics;
pub mod telemetry;
