//! HTTP listener with graceful, bounded draining.
//!
//! # Responsibilities
//! - Bind the configured address and serve the router
//! - Track the serve loop as a unit of work
//! - Stop accepting on drain, let in-flight connections finish
//! - Abort whatever is left when the drain deadline passes
//!
//! # Design Decisions
//! - The socket is owned by the serve task; dropping it on drain makes new
//!   connection attempts fail instead of queueing
//! - Connections are children of the serve task (`JoinSet`), so a forced
//!   stop really aborts them and releases their request registrations
//! - Start binds before returning (bind errors surface to the caller) but
//!   serving runs on its own task
//! - The drain bound comes from the caller's token, never from here

use axum::extract::ConnectInfo;
use axum::http::Request;
use axum::Router;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use crate::config::ListenerConfig;
use crate::lifecycle::cancel::CancelToken;
use crate::lifecycle::tracker::{TaskKind, TaskTracker};

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Failed to bind to address.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Operation not allowed in the current state.
    #[error("Listener cannot {operation} while {state:?}")]
    InvalidState {
        operation: &'static str,
        state: ListenerState,
    },
}

/// Listener lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// Created, socket not bound yet.
    Stopped,
    /// Binding the socket.
    Starting,
    /// Socket bound and accepting.
    Running,
    /// Socket closed; in-flight connections finishing.
    Draining,
    /// Serve loop finished; cannot be restarted.
    StoppedFinal,
}

/// How the drain ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every accepted connection finished before the deadline.
    Graceful,
    /// The deadline passed and remaining connections were aborted.
    Forced,
    /// The listener was never running.
    NotRunning,
}

/// The HTTP listener. One per process, owned by the shutdown orchestrator.
pub struct Listener {
    config: ListenerConfig,
    app: Option<Router>,
    tracker: TaskTracker,
    state: ListenerState,
    local_addr: Option<SocketAddr>,
    stop: CancellationToken,
    serve: Option<JoinHandle<std::io::Result<()>>>,
}

impl Listener {
    /// Create a listener for `app`. Nothing is bound until `start`.
    pub fn new(config: ListenerConfig, app: Router, tracker: TaskTracker) -> Self {
        Self {
            config,
            app: Some(app),
            tracker,
            state: ListenerState::Stopped,
            local_addr: None,
            stop: CancellationToken::new(),
            serve: None,
        }
    }

    pub fn state(&self) -> ListenerState {
        self.state
    }

    /// Address actually bound (resolves port 0), once running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Bind the socket and start serving in the background.
    pub async fn start(&mut self) -> Result<SocketAddr, ListenerError> {
        if self.state != ListenerState::Stopped {
            return Err(ListenerError::InvalidState {
                operation: "start",
                state: self.state,
            });
        }
        let Some(app) = self.app.take() else {
            return Err(ListenerError::InvalidState {
                operation: "start",
                state: self.state,
            });
        };

        self.state = ListenerState::Starting;
        let addr = self.config.socket_addr();

        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(source) => {
                self.state = ListenerState::StoppedFinal;
                return Err(ListenerError::Bind { addr, source });
            }
        };
        let local_addr = listener
            .local_addr()
            .map_err(|source| ListenerError::Bind { addr, source })?;

        let guard = self.tracker.register(TaskKind::Listener);
        let stop = self.stop.clone();
        self.serve = Some(tokio::spawn(async move {
            let _guard = guard;
            serve(listener, app, stop).await
        }));

        self.local_addr = Some(local_addr);
        self.state = ListenerState::Running;
        tracing::info!(address = %local_addr, "Listening for connections");
        Ok(local_addr)
    }

    /// Stop accepting and wait for in-flight connections, at most until
    /// `deadline` triggers. Remaining connections are then aborted.
    pub async fn stop_graceful(&mut self, deadline: &CancelToken) -> DrainOutcome {
        let Some(mut serve) = self.serve.take() else {
            return DrainOutcome::NotRunning;
        };

        self.state = ListenerState::Draining;
        tracing::info!(
            grace = ?deadline.remaining(),
            "Stopped accepting new connections, draining"
        );
        self.stop.cancel();

        let outcome = tokio::select! {
            finished = &mut serve => {
                match finished {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::error!(error = %e, "HTTP server exited with error"),
                    Err(e) => tracing::error!(error = %e, "HTTP server task failed"),
                }
                DrainOutcome::Graceful
            }
            _ = deadline.triggered() => {
                tracing::warn!("Grace period elapsed, aborting remaining connections");
                serve.abort();
                // Join so the aborted connections' registrations are released
                // before the caller moves on.
                let _ = serve.await;
                DrainOutcome::Forced
            }
        };

        self.state = ListenerState::StoppedFinal;
        match outcome {
            DrainOutcome::Graceful => tracing::info!("HTTP server was shut down gracefully"),
            _ => tracing::warn!("HTTP server was shut down forcefully"),
        }
        outcome
    }
}

/// Accept loop. Connections run in a `JoinSet` owned by this future, so
/// aborting the serve task aborts every connection with it.
async fn serve(listener: TcpListener, app: Router, stop: CancellationToken) -> std::io::Result<()> {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, remote_addr)) => {
                    tracing::debug!(peer_addr = %remote_addr, "Connection accepted");
                    connections.spawn(serve_connection(stream, remote_addr, app.clone(), stop.clone()));
                }
                Err(e) => {
                    // Usually fd exhaustion; back off instead of spinning.
                    tracing::warn!(error = %e, "Failed to accept connection");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    // Close the socket first so new connection attempts are refused.
    drop(listener);
    tracing::debug!(in_flight = connections.len(), "Waiting for connections to finish");

    while let Some(joined) = connections.join_next().await {
        if let Err(e) = joined {
            if e.is_panic() {
                tracing::error!(error = %e, "Connection task panicked");
            }
        }
    }
    Ok(())
}

async fn serve_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    app: Router,
    stop: CancellationToken,
) {
    let service = service_fn(move |mut request: Request<Incoming>| {
        request.extensions_mut().insert(ConnectInfo(remote_addr));
        app.clone().oneshot(request)
    });

    let builder = Builder::new(TokioExecutor::new());
    let connection = builder.serve_connection(TokioIo::new(stream), service);
    tokio::pin!(connection);

    let result = tokio::select! {
        result = connection.as_mut() => result,
        _ = stop.cancelled() => {
            // Finish the in-flight request, then close; idle connections close now.
            connection.as_mut().graceful_shutdown();
            connection.await
        }
    };

    if let Err(e) = result {
        tracing::debug!(peer_addr = %remote_addr, error = %e, "Connection closed with error");
    }
}
