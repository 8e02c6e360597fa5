//! jwt-sign service binary.
//!
//! # Architecture Overview
//!
//! ```text
//!     SIGTERM/SIGINT ──▶ root CancelToken ──▶ ShutdownOrchestrator
//!                                                   │ owns
//!                                                   ▼
//!     Client ──▶ net::listener ──▶ http::server ──▶ http::pipeline ──▶ api::handlers
//!                     │                                 │                  │
//!                     └──────── register/release ───────┴── TaskTracker ◀──┘
//!                                                             (background subtasks,
//!                                                              telemetry drain)
//! ```
//!
//! Exit status: 0 after a clean shutdown, 1 when startup fails or a lifecycle
//! invariant was violated, 2 when the shutdown deadline forced termination.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;

use jwt_sign::api::PlaceholderSigner;
use jwt_sign::config::loader::{finalize, load_config};
use jwt_sign::config::validation::production_warnings;
use jwt_sign::config::{AppConfig, Cli};
use jwt_sign::lifecycle::shutdown::EXIT_FAILURE;
use jwt_sign::lifecycle::signals::forward_termination_signals;
use jwt_sign::lifecycle::{start_with, CancelToken};
use jwt_sign::observability::logging::init_logging;
use jwt_sign::observability::metrics::init_metrics;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => match load_config(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load {}: {e}", path.display());
                return ExitCode::from(EXIT_FAILURE);
            }
        },
        None => AppConfig::default(),
    };
    cli.apply(&mut config);

    if let Err(e) = init_logging(&config) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::from(EXIT_FAILURE);
    }

    let config = match finalize(config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "jwt-sign starting");
    if config.development {
        tracing::warn!("Development mode is active, do not use in production");
    }
    for warning in production_warnings(&config) {
        tracing::warn!("{warning}");
    }

    if let Some(address) = &config.observability.metrics_address {
        match address.parse() {
            Ok(addr) => init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %address,
                "Failed to parse metrics address"
            ),
        }
    }

    // Installed before the port is bound; a signal during startup shuts
    // the service down as soon as it is running.
    let root = CancelToken::new();
    let _signals = match forward_termination_signals(root.clone()) {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!(error = %e, "Unable to install signal handlers");
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    let signer = Arc::new(PlaceholderSigner::default());
    let orchestrator = match start_with(config, signer, root).await {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    let report = orchestrator.run().await;
    ExitCode::from(report.exit_code())
}
