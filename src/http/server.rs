//! HTTP router assembly.
//!
//! # Responsibilities
//! - Mount the API routes, under the ingress prefix when one is configured
//! - Wire up middleware (tracing, correlation id, CORS, pipeline, timeout, panics)
//!
//! # Layer order (outermost first)
//! ```text
//! TraceLayer → SetRequestId → PropagateRequestId → CORS (optional)
//!     → request pipeline → Timeout → CatchPanic → handler
//! ```
//! The pipeline sits outside the timeout and panic layers so it always sees
//! a response, and releases its registration, whatever the handler did.

use axum::http::header::{
    ACCEPT, ACCEPT_ENCODING, AUTHORIZATION, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE, ORIGIN,
};
use axum::http::{HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{middleware, Json, Router};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::api::handlers::{validate_jwt, verify_signature, ApiState};
use crate::api::signing::SignatureService;
use crate::config::schema::HttpConfig;
use crate::config::AppConfig;
use crate::http::pipeline::{request_pipeline, PipelineState};
use crate::http::request::{propagate_correlation_id_layer, set_correlation_id_layer};

const CORS_MAX_AGE: Duration = Duration::from_secs(12 * 60 * 60);

/// Build the application router with all middleware layers.
#[allow(deprecated)]
pub fn build_router<S: SignatureService>(
    config: &AppConfig,
    signer: Arc<S>,
    pipeline: PipelineState,
) -> Router {
    let api = Router::new()
        .route("/v1/validate-jwt", post(validate_jwt::<S>))
        .route("/v1/verify-signature", post(verify_signature::<S>))
        .with_state(ApiState {
            signer,
            development: config.development,
        })
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
        .layer(middleware::from_fn_with_state(pipeline, request_pipeline));

    let mut app = match config.http.ingress_prefix.as_str() {
        "" => api,
        prefix => Router::new().nest(prefix, api),
    };

    if let Some(cors) = cors_layer(&config.http) {
        tracing::info!(origin = %config.http.cors_allow_origins, "CORS enabled");
        app = app.layer(cors);
    }

    app.layer(propagate_correlation_id_layer())
        .layer(set_correlation_id_layer())
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(config: &HttpConfig) -> Option<CorsLayer> {
    let origin = HeaderValue::from_str(config.cors_origin()?).ok()?;
    Some(
        CorsLayer::new()
            .allow_origin(origin)
            .allow_methods([
                Method::POST,
                Method::HEAD,
                Method::PATCH,
                Method::OPTIONS,
                Method::GET,
                Method::PUT,
            ])
            .allow_headers([
                CONTENT_TYPE,
                CONTENT_LENGTH,
                ACCEPT_ENCODING,
                HeaderName::from_static("x-csrf-token"),
                AUTHORIZATION,
                ACCEPT,
                ORIGIN,
                CACHE_CONTROL,
                HeaderName::from_static("x-requested-with"),
            ])
            .expose_headers([CONTENT_LENGTH])
            .allow_credentials(true)
            .max_age(CORS_MAX_AGE),
    )
}

fn handle_panic(payload: Box<dyn Any + Send + 'static>) -> Response {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    tracing::error!(panic = %detail, "Handler panicked");

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({
            "code": StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            "error": "internal server error",
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::signing::{PlaceholderSigner, SigningError};
    use crate::lifecycle::cancel::CancelToken;
    use crate::lifecycle::tracker::TaskTracker;
    use crate::observability::telemetry::Tracer;
    use axum::body::Body;
    use axum::http::Request;
    use std::future::Future;
    use tower::ServiceExt;

    fn pipeline(tracker: &TaskTracker) -> PipelineState {
        PipelineState {
            tracker: tracker.clone(),
            root: CancelToken::new(),
            tracer: Tracer::disabled(),
        }
    }

    fn verify_request(uri: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .header("origin", "https://app.example.com")
            .body(Body::from(
                r#"{"user":"JonnyBoy","signature":"test-signature-JonnyBoy"}"#,
            ))
            .unwrap()
    }

    #[tokio::test]
    async fn routes_are_mounted_under_ingress_prefix() {
        let mut config = AppConfig::default();
        config.http.ingress_prefix = "/jwt-sign".to_string();
        let tracker = TaskTracker::new();
        let router = build_router(&config, Arc::new(PlaceholderSigner::default()), pipeline(&tracker));

        let response = router
            .clone()
            .oneshot(verify_request("/jwt-sign/v1/verify-signature"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .oneshot(verify_request("/v1/verify-signature"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn generates_and_echoes_correlation_id() {
        let config = AppConfig::default();
        let tracker = TaskTracker::new();
        let router = build_router(&config, Arc::new(PlaceholderSigner::default()), pipeline(&tracker));

        let response = router
            .oneshot(verify_request("/v1/verify-signature"))
            .await
            .unwrap();
        let header = response
            .headers()
            .get("x-correlation-id")
            .and_then(|v| v.to_str().ok())
            .unwrap()
            .to_string();
        let body = axum::body::to_bytes(response.into_body(), 64 * 1024).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert!(uuid::Uuid::parse_str(&header).is_ok());
        assert_eq!(body["correlation_id"], header.as_str());
    }

    #[tokio::test]
    async fn cors_follows_configuration() {
        let mut config = AppConfig::default();
        let tracker = TaskTracker::new();
        let router = build_router(&config, Arc::new(PlaceholderSigner::default()), pipeline(&tracker));
        let response = router
            .oneshot(verify_request("/v1/verify-signature"))
            .await
            .unwrap();
        assert!(response.headers().get("access-control-allow-origin").is_none());

        config.http.cors_allow_origins = "https://app.example.com".to_string();
        let router = build_router(&config, Arc::new(PlaceholderSigner::default()), pipeline(&tracker));
        let response = router
            .oneshot(verify_request("/v1/verify-signature"))
            .await
            .unwrap();
        assert_eq!(
            response.headers().get("access-control-allow-origin").unwrap(),
            "https://app.example.com"
        );
        assert_eq!(
            response.headers().get("access-control-allow-credentials").unwrap(),
            "true"
        );
    }

    struct PanickingSigner;

    impl SignatureService for PanickingSigner {
        async fn sign_answers(&self, _: &[String], _: &[String]) -> Result<String, SigningError> {
            panic!("signer bug");
        }

        async fn verify(&self, _: &str, _: &str) -> Result<bool, SigningError> {
            panic!("signer bug");
        }

        fn onboard(
            &self,
            _: String,
        ) -> impl Future<Output = Result<(), SigningError>> + Send + 'static {
            async { Ok(()) }
        }
    }

    #[tokio::test]
    async fn handler_panic_becomes_500_and_releases_registration() {
        let config = AppConfig::default();
        let tracker = TaskTracker::new();
        let router = build_router(&config, Arc::new(PanickingSigner), pipeline(&tracker));

        let response = router
            .oneshot(verify_request("/v1/verify-signature"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(tracker.outstanding().total(), 0);
        assert_eq!(tracker.outstanding().violations(), 0);
    }
}
