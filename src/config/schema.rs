//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the service.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Overall shutdown timeout used in production when none is configured.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 300;

/// Overall shutdown timeout used in development when none is configured.
pub const DEFAULT_DEVELOPMENT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Shutdown timeouts below this are flagged in production.
pub const RECOMMENDED_MIN_SHUTDOWN_TIMEOUT_SECS: u64 = 120;

/// Root configuration for the service.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// Development mode: verbose errors, pretty logs, short shutdown timeout.
    pub development: bool,

    /// Deployment environment name, attached to telemetry.
    pub environment: String,

    /// Listener configuration (bind address, grace period).
    pub listener: ListenerConfig,

    /// Shutdown coordination.
    pub shutdown: ShutdownConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// HTTP surface settings (CORS, path prefix).
    pub http: HttpConfig,

    /// Span export settings.
    pub telemetry: TelemetryConfig,

    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            development: false,
            environment: "local".to_string(),
            listener: ListenerConfig::default(),
            shutdown: ShutdownConfig::default(),
            timeouts: TimeoutConfig::default(),
            http: HttpConfig::default(),
            telemetry: TelemetryConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl AppConfig {
    /// Overall shutdown timeout, falling back to the mode-specific default.
    pub fn shutdown_timeout(&self) -> Duration {
        let secs = self.shutdown.timeout_secs.unwrap_or(if self.development {
            DEFAULT_DEVELOPMENT_SHUTDOWN_TIMEOUT_SECS
        } else {
            DEFAULT_SHUTDOWN_TIMEOUT_SECS
        });
        Duration::from_secs(secs)
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Interface to bind (e.g., "0.0.0.0").
    pub host: IpAddr,

    /// TCP port; 0 picks an ephemeral port.
    pub port: u16,

    /// Grace period for in-flight connections after draining starts, in seconds.
    pub grace_secs: u64,
}

impl ListenerConfig {
    /// The socket address to bind.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8080,
            grace_secs: 20,
        }
    }
}

/// Shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Overall bound on graceful shutdown, in seconds.
    /// Unset means 300 in production and 30 in development.
    pub timeout_secs: Option<u64>,
}

/// Timeout configuration for request handling.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// HTTP surface configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Allowed CORS origin, or "Disabled".
    pub cors_allow_origins: String,

    /// Path prefix added in front of every route when running behind an ingress.
    pub ingress_prefix: String,
}

impl HttpConfig {
    /// The configured CORS origin, if CORS is enabled.
    pub fn cors_origin(&self) -> Option<&str> {
        match self.cors_allow_origins.as_str() {
            "" | "Disabled" => None,
            origin => Some(origin),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            cors_allow_origins: "Disabled".to_string(),
            ingress_prefix: String::new(),
        }
    }
}

/// Where finished spans are exported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TelemetryMode {
    /// Spans are not exported.
    #[default]
    Disabled,
    /// Human-readable span dumps on stdout.
    Local,
    /// OTLP over HTTP to `endpoint`.
    Remote,
}

/// Span export configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub mode: TelemetryMode,

    /// OTLP/HTTP traces URL for remote export, e.g. `http://collector:4318/v1/traces`.
    pub endpoint: Option<String>,

    /// Service name attached to every span.
    pub service_name: String,

    /// Bounded queue between span producers and the exporter.
    pub queue_capacity: usize,

    /// Maximum spans per export batch.
    pub batch_size: usize,

    /// Flush interval for partially filled batches, in milliseconds.
    pub flush_interval_ms: u64,

    /// Timeout for a single remote export request, in seconds.
    pub export_timeout_secs: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            mode: TelemetryMode::Disabled,
            endpoint: None,
            service_name: "jwt-sign".to_string(),
            queue_capacity: 2048,
            batch_size: 128,
            flush_interval_ms: 1000,
            export_timeout_secs: 10,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Structured JSON, one event per line.
    Json,
    /// Human-readable multi-line output.
    Pretty,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log filter directive; `RUST_LOG` takes precedence.
    pub log_level: Option<String>,

    /// Log format; JSON in production and pretty in development when unset.
    pub log_format: Option<LogFormat>,

    /// Prometheus scrape endpoint bind address; metrics export is off when unset.
    pub metrics_address: Option<String>,
}
