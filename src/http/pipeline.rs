//! Per-request execution context.
//!
//! # Data Flow
//! ```text
//! request
//!     → correlation id (header, or a fresh UUID)
//!     → telemetry span opened with the id as attribute
//!     → TaskKind::Request registered
//!     → RequestContext inserted into extensions
//!     → handler runs inside a tracing span
//!     → span closed with final status, metrics recorded
//!     → registration released (guard drop covers panics and aborts)
//! ```
//!
//! # Design Decisions
//! - The pipeline never waits for background subtasks; the tracker does
//! - Subtasks register before they are spawned, so a shutdown that starts
//!   right after the response still sees them

use axum::extract::{FromRequestParts, MatchedPath, Request, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use opentelemetry::trace::Status;
use opentelemetry::{Context, KeyValue};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

use crate::http::request::correlation_id;
use crate::lifecycle::cancel::CancelToken;
use crate::lifecycle::tracker::{TaskGuard, TaskKind, TaskTracker};
use crate::observability::metrics;
use crate::observability::telemetry::{TraceSpan, Tracer};

/// Shared state of the pipeline middleware.
#[derive(Clone, Debug)]
pub struct PipelineState {
    pub tracker: TaskTracker,
    pub root: CancelToken,
    pub tracer: Tracer,
}

/// Wraps every routed request. Install with `middleware::from_fn_with_state`.
pub async fn request_pipeline(
    State(state): State<PipelineState>,
    mut request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let correlation_id: Arc<str> = correlation_id(request.headers())
        .map(Arc::from)
        .unwrap_or_else(|| Arc::from(Uuid::new_v4().to_string()));
    let method = request.method().clone();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());

    let mut span = state.tracer.start_span(
        None,
        "http.request",
        vec![
            KeyValue::new("correlation_id", correlation_id.to_string()),
            KeyValue::new("http.request.method", method.to_string()),
            KeyValue::new("http.route", route.clone()),
        ],
    );
    let guard = state.tracker.register(TaskKind::Request);

    request.extensions_mut().insert(RequestContext {
        correlation_id: correlation_id.clone(),
        otel: span.context().clone(),
        tracker: state.tracker.clone(),
        cancel: state.root.clone(),
        tracer: state.tracer.clone(),
    });

    let log_span = tracing::info_span!(
        "request",
        correlation_id = %correlation_id,
        method = %method,
        route = %route,
    );
    let response = next.run(request).instrument(log_span).await;

    let status = response.status();
    span.set_attribute(KeyValue::new(
        "http.response.status_code",
        i64::from(status.as_u16()),
    ));
    span.set_status(if status.is_server_error() {
        Status::error(status.canonical_reason().unwrap_or("server error"))
    } else {
        Status::Ok
    });
    span.end();
    metrics::record_request(method.as_str(), &route, status.as_u16(), start);

    // Underflow is already reported by the tracker.
    let _ = guard.release();
    response
}

/// What a handler can reach of its request: identity, cancellation, tracing
/// and the ability to detach tracked work.
#[derive(Clone, Debug)]
pub struct RequestContext {
    correlation_id: Arc<str>,
    otel: Context,
    tracker: TaskTracker,
    cancel: CancelToken,
    tracer: Tracer,
}

impl RequestContext {
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Telemetry context of the request span.
    pub fn span_context(&self) -> &Context {
        &self.otel
    }

    pub fn is_shutting_down(&self) -> bool {
        self.cancel.is_triggered()
    }

    /// Start a span under the request span, tagged with the correlation id.
    pub fn start_span(&self, name: &'static str) -> TraceSpan {
        self.tracer.start_span(
            Some(&self.otel),
            name,
            vec![KeyValue::new("correlation_id", self.correlation_id.to_string())],
        )
    }

    /// Detach work that outlives the response but must finish before exit.
    ///
    /// The subtask is registered before this returns. Its span is a child of
    /// the request span and its log lines carry the correlation id.
    pub fn spawn_background<F, E>(&self, name: &'static str, work: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let subtask = BackgroundSubtask {
            name,
            guard: self.tracker.register(TaskKind::Background),
            span: self.start_span(name),
        };
        let log_span = tracing::info_span!(
            "background",
            correlation_id = %self.correlation_id,
            task = name,
        );

        tokio::spawn(
            async move {
                tracing::debug!("Background subtask started");
                let result = work.await;
                subtask.finish(result);
            }
            .instrument(log_span),
        )
    }
}

impl<S: Send + Sync> FromRequestParts<S> for RequestContext {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .ok_or((
                StatusCode::INTERNAL_SERVER_ERROR,
                "request pipeline is not installed",
            ))
    }
}

/// Detached work tied to a request. Holds its own registration, released
/// when the work ends, panics included.
#[derive(Debug)]
pub struct BackgroundSubtask {
    name: &'static str,
    guard: TaskGuard,
    span: TraceSpan,
}

impl BackgroundSubtask {
    fn finish<E: Display>(mut self, result: Result<(), E>) {
        match result {
            Ok(()) => {
                self.span.set_status(Status::Ok);
                tracing::debug!(task = self.name, "Background subtask finished");
            }
            Err(e) => {
                self.span.set_status(Status::error(e.to_string()));
                tracing::warn!(task = self.name, error = %e, "Background subtask failed");
            }
        }
        self.span.end();
        let _ = self.guard.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::routing::get;
    use axum::{middleware, Router};
    use opentelemetry::trace::TraceContextExt;
    use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracerProvider};
    use std::time::Duration;
    use tower::ServiceExt;

    fn state() -> PipelineState {
        PipelineState {
            tracker: TaskTracker::new(),
            root: CancelToken::new(),
            tracer: Tracer::disabled(),
        }
    }

    fn app(state: PipelineState, router: Router) -> Router {
        router.layer(middleware::from_fn_with_state(state, request_pipeline))
    }

    #[tokio::test]
    async fn request_is_registered_while_handler_runs() {
        let state = state();
        let tracker = state.tracker.clone();
        let router = Router::new().route(
            "/",
            get(|ctx: RequestContext| async move {
                // The handler itself is counted.
                ctx.tracker.outstanding().get(TaskKind::Request).to_string()
            }),
        );

        let response = app(state, router)
            .oneshot(axum::http::Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 64).await.unwrap();
        assert_eq!(&body[..], b"1");
        assert_eq!(tracker.outstanding().total(), 0);
    }

    #[tokio::test]
    async fn propagates_incoming_correlation_id() {
        let router = Router::new().route(
            "/",
            get(|ctx: RequestContext| async move { ctx.correlation_id().to_string() }),
        );

        let response = app(state(), router)
            .oneshot(
                axum::http::Request::builder()
                    .uri("/")
                    .header("x-correlation-id", "req-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = axum::body::to_bytes(response.into_body(), 64).await.unwrap();
        assert_eq!(&body[..], b"req-42");
    }

    #[tokio::test]
    async fn background_subtask_outlives_response() {
        let state = state();
        let tracker = state.tracker.clone();
        let router = Router::new().route(
            "/",
            get(|ctx: RequestContext| async move {
                ctx.spawn_background("sleepy", async {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok::<_, std::convert::Infallible>(())
                });
                "done"
            }),
        );

        let response = app(state, router)
            .oneshot(axum::http::Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // The response is out, the subtask is still tracked.
        assert_eq!(tracker.outstanding().get(TaskKind::Request), 0);
        assert_eq!(tracker.outstanding().get(TaskKind::Background), 1);

        tracker
            .wait_until_zero(Duration::from_secs(2))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn failing_subtask_still_releases() {
        let state = state();
        let tracker = state.tracker.clone();
        let ctx = RequestContext {
            correlation_id: Arc::from("cid"),
            otel: state.tracer.start_span(None, "request", Vec::new()).context().clone(),
            tracker: tracker.clone(),
            cancel: state.root.clone(),
            tracer: state.tracer.clone(),
        };

        let handle = ctx.spawn_background("fails", async { Err::<(), _>("boom") });
        handle.await.unwrap();
        assert_eq!(tracker.outstanding().total(), 0);
    }

    #[tokio::test]
    async fn panicking_subtask_still_releases() {
        let state = state();
        let tracker = state.tracker.clone();
        let ctx = RequestContext {
            correlation_id: Arc::from("cid"),
            otel: state.tracer.start_span(None, "request", Vec::new()).context().clone(),
            tracker: tracker.clone(),
            cancel: state.root.clone(),
            tracer: state.tracer.clone(),
        };

        let handle = ctx.spawn_background("panics", async {
            if true {
                panic!("subtask blew up");
            }
            Ok::<_, std::convert::Infallible>(())
        });
        assert!(handle.await.unwrap_err().is_panic());
        assert_eq!(tracker.outstanding().total(), 0);
        assert_eq!(tracker.outstanding().violations(), 0);
    }

    #[tokio::test]
    async fn context_sees_shutdown() {
        let state = state();
        let root = state.root.clone();
        let router = Router::new().route(
            "/",
            get(|ctx: RequestContext| async move { ctx.is_shutting_down().to_string() }),
        );

        root.trigger();
        let response = app(state, router)
            .oneshot(axum::http::Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = axum::body::to_bytes(response.into_body(), 64).await.unwrap();
        assert_eq!(&body[..], b"true");
    }

    #[tokio::test]
    async fn subtask_span_is_a_child_of_the_request_span() {
        let exporter = InMemorySpanExporter::default();
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        let state = PipelineState {
            tracer: Tracer::new(&provider, "test"),
            ..state()
        };
        let tracker = state.tracker.clone();
        let router = Router::new().route(
            "/",
            get(|ctx: RequestContext| async move {
                ctx.spawn_background("audit", async { Ok::<_, std::convert::Infallible>(()) });
                ctx.span_context().span().span_context().span_id().to_string()
            }),
        );

        let response = app(state, router)
            .oneshot(
                axum::http::Request::builder()
                    .uri("/")
                    .header("x-correlation-id", "req-7")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = axum::body::to_bytes(response.into_body(), 64).await.unwrap();
        tracker.wait_until_zero(Duration::from_secs(2)).await.unwrap();

        let spans = exporter.get_finished_spans().unwrap();
        let request = spans.iter().find(|s| s.name == "http.request").unwrap();
        let subtask = spans.iter().find(|s| s.name == "audit").unwrap();
        assert_eq!(&body[..], request.span_context.span_id().to_string().as_bytes());
        assert_eq!(subtask.parent_span_id, request.span_context.span_id());
        assert_eq!(
            subtask.span_context.trace_id(),
            request.span_context.trace_id()
        );
        assert_eq!(subtask.status, Status::Ok);
        assert!(request
            .attributes
            .iter()
            .any(|kv| kv.key.as_str() == "correlation_id" && kv.value.as_str() == "req-7"));
    }
}
