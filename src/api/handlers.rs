//! Endpoint handlers.
//!
//! Each handler opens its own span under the request span, records parse,
//! validation and service errors on it, and answers with the JSON envelopes.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use opentelemetry::trace::Status;
use std::sync::Arc;

use crate::api::model::{JwtValidation, SignatureValidation, SigningOutcome};
use crate::api::signing::SignatureService;
use crate::http::pipeline::RequestContext;
use crate::http::response::{ApiError, ApiFailure, ApiSuccess};
use crate::observability::telemetry::TraceSpan;

/// State shared by the handlers.
pub struct ApiState<S> {
    pub signer: Arc<S>,
    pub development: bool,
}

impl<S> Clone for ApiState<S> {
    fn clone(&self) -> Self {
        Self {
            signer: self.signer.clone(),
            development: self.development,
        }
    }
}

type ApiResult = Result<ApiSuccess<SigningOutcome>, ApiFailure>;

/// `POST /v1/validate-jwt`: sign the answers and start onboarding.
pub async fn validate_jwt<S: SignatureService>(
    State(state): State<ApiState<S>>,
    ctx: RequestContext,
    payload: Result<Json<JwtValidation>, JsonRejection>,
) -> ApiResult {
    let mut span = ctx.start_span("JWT user validation");

    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            span.record_error(&rejection);
            return Err(fail(span, ApiError::Parse(rejection.body_text()), &ctx, &state));
        }
    };
    if let Err(e) = request.validate() {
        span.record_error(&e);
        return Err(fail(span, ApiError::Validation(e.to_string()), &ctx, &state));
    }

    span.add_event("Sign answers");
    let signature = match state
        .signer
        .sign_answers(&request.questions, &request.answers)
        .await
    {
        Ok(signature) => signature,
        Err(e) => {
            span.record_error(&e);
            let err = ApiError::internal("failed to sign answers", e);
            return Err(fail(span, err, &ctx, &state));
        }
    };
    tracing::debug!(signature = %signature, "Answers signed");

    span.add_event("Start onboarding");
    ctx.spawn_background("onboarding", state.signer.onboard(signature.clone()));

    span.set_status(Status::Ok);
    span.end();
    Ok(ApiSuccess::new(
        SigningOutcome {
            status: "successfully".to_string(),
            signature: Some(signature),
        },
        ctx.correlation_id(),
    ))
}

/// `POST /v1/verify-signature`: check that the signature belongs to the user.
pub async fn verify_signature<S: SignatureService>(
    State(state): State<ApiState<S>>,
    ctx: RequestContext,
    payload: Result<Json<SignatureValidation>, JsonRejection>,
) -> ApiResult {
    let mut span = ctx.start_span("Signature Validation");

    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            span.record_error(&rejection);
            return Err(fail(span, ApiError::Parse(rejection.body_text()), &ctx, &state));
        }
    };
    if let Err(e) = request.validate() {
        span.record_error(&e);
        return Err(fail(span, ApiError::Validation(e.to_string()), &ctx, &state));
    }

    span.add_event("Validate signature");
    match state.signer.verify(&request.user, &request.signature).await {
        Ok(true) => {}
        Ok(false) => {
            let err = ApiError::Rejected("user is not present in the signature".to_string());
            return Err(fail(span, err, &ctx, &state));
        }
        Err(e) => {
            span.record_error(&e);
            let err = ApiError::internal("failed to verify signature", e);
            return Err(fail(span, err, &ctx, &state));
        }
    }

    span.set_status(Status::Ok);
    span.end();
    Ok(ApiSuccess::new(
        SigningOutcome {
            status: "OK if signature belongs to user".to_string(),
            signature: None,
        },
        ctx.correlation_id(),
    ))
}

fn fail<S>(mut span: TraceSpan, err: ApiError, ctx: &RequestContext, state: &ApiState<S>) -> ApiFailure {
    tracing::warn!(status = err.status().as_u16(), error = %err, "Request failed");
    span.set_status(Status::error(err.to_string()));
    span.end();
    err.with_context(ctx.correlation_id(), state.development)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::signing::{PlaceholderSigner, SigningError};
    use crate::http::pipeline::{request_pipeline, PipelineState};
    use crate::lifecycle::cancel::CancelToken;
    use crate::lifecycle::tracker::TaskTracker;
    use crate::observability::telemetry::Tracer;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::routing::post;
    use axum::{middleware, Router};
    use serde_json::Value;
    use std::future::Future;
    use std::time::Duration;
    use tower::ServiceExt;

    struct BrokenSigner;

    impl SignatureService for BrokenSigner {
        async fn sign_answers(&self, _: &[String], _: &[String]) -> Result<String, SigningError> {
            Err(SigningError::Unavailable("key store offline".into()))
        }

        async fn verify(&self, _: &str, _: &str) -> Result<bool, SigningError> {
            Err(SigningError::Unavailable("key store offline".into()))
        }

        fn onboard(
            &self,
            _: String,
        ) -> impl Future<Output = Result<(), SigningError>> + Send + 'static {
            async { Ok(()) }
        }
    }

    fn router<S: SignatureService>(signer: S, tracker: TaskTracker) -> Router {
        let pipeline = PipelineState {
            tracker,
            root: CancelToken::new(),
            tracer: Tracer::disabled(),
        };
        Router::new()
            .route("/v1/validate-jwt", post(validate_jwt::<S>))
            .route("/v1/verify-signature", post(verify_signature::<S>))
            .with_state(ApiState {
                signer: Arc::new(signer),
                development: true,
            })
            .layer(middleware::from_fn_with_state(pipeline, request_pipeline))
    }

    async fn call(router: Router, uri: &str, body: &str) -> (StatusCode, Value) {
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .header("x-correlation-id", "test-cid")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn validate_jwt_signs_and_onboards() {
        let tracker = TaskTracker::new();
        let (status, body) = call(
            router(PlaceholderSigner::default(), tracker.clone()),
            "/v1/validate-jwt",
            r#"{"jwt":"t","questions":["q1"],"answers":["a1"]}"#,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["code"], 200);
        assert_eq!(body["correlation_id"], "test-cid");
        assert_eq!(body["data"]["status"], "successfully");
        assert_eq!(body["data"]["signature"], "test-signature-JonnyBoy");

        tracker.wait_until_zero(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn validate_jwt_rejects_missing_answers() {
        let (status, body) = call(
            router(PlaceholderSigner::default(), TaskTracker::new()),
            "/v1/validate-jwt",
            r#"{"jwt":"t","questions":["q1"]}"#,
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body["error"],
            "error while validating request: missing parameter: Answers"
        );
    }

    #[tokio::test]
    async fn malformed_json_is_a_parse_error() {
        let (status, body) = call(
            router(PlaceholderSigner::default(), TaskTracker::new()),
            "/v1/verify-signature",
            "{not json",
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"]
            .as_str()
            .unwrap()
            .starts_with("error while parsing request"));
    }

    #[tokio::test]
    async fn verify_signature_accepts_matching_user() {
        let (status, body) = call(
            router(PlaceholderSigner::default(), TaskTracker::new()),
            "/v1/verify-signature",
            r#"{"user":"JonnyBoy","signature":"test-signature-JonnyBoy"}"#,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(body["data"].get("signature").is_none());
    }

    #[tokio::test]
    async fn verify_signature_rejects_foreign_user() {
        let (status, body) = call(
            router(PlaceholderSigner::default(), TaskTracker::new()),
            "/v1/verify-signature",
            r#"{"user":"alice","signature":"test-signature-JonnyBoy"}"#,
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "user is not present in the signature");
        assert_eq!(body["correlation_id"], "test-cid");
    }

    #[tokio::test]
    async fn signer_failure_is_internal_with_stack_in_development() {
        let tracker = TaskTracker::new();
        let (status, body) = call(
            router(BrokenSigner, tracker.clone()),
            "/v1/validate-jwt",
            r#"{"jwt":"t","questions":["q1"],"answers":["a1"]}"#,
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "failed to sign answers");
        assert_eq!(body["stack"], "signer unavailable: key store offline");
        // No onboarding was started.
        assert_eq!(tracker.outstanding().total(), 0);
    }
}
