//! jwt-sign: signing and verification service with a tracked process lifecycle.

pub mod api;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use config::schema::AppConfig;
pub use lifecycle::{ShutdownOrchestrator, ShutdownReport};
