//! Command-line and environment overrides.

use clap::Parser;
use std::path::PathBuf;

use crate::config::schema::{AppConfig, LogFormat, TelemetryMode};

#[derive(Debug, Parser)]
#[command(name = "jwt-sign")]
#[command(version, about = "Signature signing and verification service", long_about = None)]
pub struct Cli {
    /// TOML configuration file; flags and environment override its values.
    #[arg(short, long, env = "JWT_SIGN_CONFIG")]
    pub config: Option<PathBuf>,

    /// TCP port for the HTTP listener to bind to.
    #[arg(short, long, env = "HTTP_PORT")]
    pub port: Option<u16>,

    /// Seconds to wait for graceful shutdown on SIGTERM/SIGINT.
    #[arg(short = 't', long = "timeout", env = "SHUTDOWN_TIMEOUT")]
    pub timeout_secs: Option<u64>,

    /// Start in development mode. Do not use this in production!
    #[arg(short, long = "devel")]
    pub development: bool,

    /// Span export mode.
    #[arg(short = 'r', long, value_enum)]
    pub telemetry: Option<TelemetryMode>,

    /// Collector URL for remote span export; implies `--telemetry remote`.
    #[arg(long, env = "TELEMETRY_ENDPOINT")]
    pub telemetry_endpoint: Option<String>,

    /// Deployment environment name.
    #[arg(long, env = "ENVIRONMENT")]
    pub environment: Option<String>,

    /// Allowed CORS origin, or "Disabled".
    #[arg(long, env = "CORS_ALLOW_ORIGINS")]
    pub cors_allow_origins: Option<String>,

    /// Route prefix when served behind an ingress.
    #[arg(long, env = "INGRESS_PREFIX")]
    pub ingress_prefix: Option<String>,

    /// Log output format.
    #[arg(long, value_enum)]
    pub log_format: Option<LogFormat>,
}

impl Cli {
    /// Overlay the flags that were given onto `config`.
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(port) = self.port {
            config.listener.port = port;
        }
        if let Some(timeout) = self.timeout_secs {
            config.shutdown.timeout_secs = Some(timeout);
        }
        if self.development {
            config.development = true;
        }
        if let Some(environment) = &self.environment {
            config.environment = environment.clone();
        }
        if let Some(origins) = &self.cors_allow_origins {
            config.http.cors_allow_origins = origins.clone();
        }
        if let Some(prefix) = &self.ingress_prefix {
            config.http.ingress_prefix = prefix.clone();
        }
        if let Some(format) = self.log_format {
            config.observability.log_format = Some(format);
        }

        if let Some(mode) = self.telemetry {
            config.telemetry.mode = mode;
        }
        if let Some(endpoint) = &self.telemetry_endpoint {
            config.telemetry.endpoint = Some(endpoint.clone());
            if self.telemetry.is_none() && config.telemetry.mode == TelemetryMode::Disabled {
                config.telemetry.mode = TelemetryMode::Remote;
            }
        }
    }
}
