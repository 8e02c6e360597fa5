//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     → args.rs (flags and environment override file values)
//!     → validation.rs (semantic checks, production warnings)
//!     → AppConfig (validated, immutable)
//!     → handed by value to startup, which splits it per subsystem
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow running with no file at all
//! - Validation separates syntactic (serde) from semantic checks

pub mod args;
pub mod loader;
pub mod schema;
pub mod validation;

pub use args::Cli;
pub use loader::ConfigError;
pub use schema::{AppConfig, ListenerConfig, LogFormat, TelemetryConfig, TelemetryMode};
