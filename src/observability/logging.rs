//! Structured logging.
//!
//! # Responsibilities
//! - Initialize logging subsystem
//! - Configure log level at runtime
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - JSON format for production, pretty format for development
//! - Log level configurable via config and environment (`RUST_LOG` wins)

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::{AppConfig, LogFormat};

/// Initialize the global tracing subscriber.
pub fn init_logging(config: &AppConfig) -> Result<(), tracing_subscriber::util::TryInitError> {
    let default_filter = config.observability.log_level.clone().unwrap_or_else(|| {
        if config.development {
            "jwt_sign=debug,tower_http=debug".to_string()
        } else {
            "jwt_sign=info,tower_http=info".to_string()
        }
    });
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());

    let format = config.observability.log_format.unwrap_or(if config.development {
        LogFormat::Pretty
    } else {
        LogFormat::Json
    });
    let fmt_layer = match format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer().pretty().boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
}
