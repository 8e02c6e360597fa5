//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize subsystems in dependency order
//! - Bind the listener and begin accepting traffic
//! - Hand the running service to the shutdown orchestrator
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Listener starts last (traffic only when ready)
//! - A bind failure stops telemetry again before returning, so nothing
//!   started here outlives the error

use std::sync::Arc;
use thiserror::Error;

use crate::api::signing::{PlaceholderSigner, SignatureService};
use crate::config::AppConfig;
use crate::http::pipeline::PipelineState;
use crate::http::server::build_router;
use crate::lifecycle::cancel::CancelToken;
use crate::lifecycle::shutdown::{ShutdownOrchestrator, ShutdownSettings};
use crate::lifecycle::tracker::TaskTracker;
use crate::net::listener::{Listener, ListenerError};
use crate::observability::telemetry::{init_telemetry, TelemetryError};

/// Errors that prevent the service from starting.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("telemetry setup failed: {0}")]
    Telemetry(#[from] TelemetryError),

    #[error(transparent)]
    Listener(#[from] ListenerError),
}

/// Start the service with the placeholder signer.
pub async fn start(config: AppConfig) -> Result<ShutdownOrchestrator, StartupError> {
    start_with_signer(config, Arc::new(PlaceholderSigner::default())).await
}

/// Start the service with the given signing backend.
pub async fn start_with_signer<S: SignatureService>(
    config: AppConfig,
    signer: Arc<S>,
) -> Result<ShutdownOrchestrator, StartupError> {
    start_with(config, signer, CancelToken::new()).await
}

/// Start the service under an existing root token.
///
/// Lets the caller install signal handlers before anything binds. A root
/// that is already triggered makes the returned orchestrator's `run` shut
/// down immediately.
pub async fn start_with<S: SignatureService>(
    config: AppConfig,
    signer: Arc<S>,
    root: CancelToken,
) -> Result<ShutdownOrchestrator, StartupError> {
    let tracker = TaskTracker::new();

    let (tracer, telemetry) = init_telemetry(&config.telemetry, &config.environment)?;

    let pipeline = PipelineState {
        tracker: tracker.clone(),
        root: root.clone(),
        tracer,
    };
    let router = build_router(&config, signer, pipeline);

    let mut listener = Listener::new(config.listener.clone(), router, tracker.clone());
    if let Err(e) = listener.start().await {
        if let Some(telemetry) = telemetry {
            telemetry.shutdown().await;
        }
        return Err(e.into());
    }

    let settings = ShutdownSettings {
        grace: config.listener.grace_period(),
        overall: config.shutdown_timeout(),
    };
    tracing::info!(
        environment = %config.environment,
        development = config.development,
        grace = ?settings.grace,
        shutdown_timeout = ?settings.overall,
        "Service started"
    );

    Ok(ShutdownOrchestrator::new(
        listener, tracker, root, telemetry, settings,
    ))
}
