//! JSON response envelopes.
//!
//! # Responsibilities
//! - Wrap successful payloads in the success envelope
//! - Map handler errors to a status code and the failure envelope
//!
//! # Design Decisions
//! - Both envelopes carry the correlation id so clients can quote it
//! - The error source chain is only exposed in development mode

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Body of every 2xx response.
#[derive(Debug, Serialize)]
pub struct ApiSuccess<T> {
    pub code: u16,
    pub data: T,
    pub message: &'static str,
    pub correlation_id: String,
}

impl<T: Serialize> ApiSuccess<T> {
    pub fn new(data: T, correlation_id: impl Into<String>) -> Self {
        Self {
            code: StatusCode::OK.as_u16(),
            data,
            message: "Success",
            correlation_id: correlation_id.into(),
        }
    }
}

impl<T: Serialize> IntoResponse for ApiSuccess<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// Errors a handler can report to the caller.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("error while parsing request: {0}")]
    Parse(String),

    #[error("error while validating request: {0}")]
    Validation(String),

    #[error("{0}")]
    Rejected(String),

    #[error("{message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ApiError {
    pub fn internal(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ApiError::Internal {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Parse(_) | ApiError::Validation(_) | ApiError::Rejected(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Attach the request's correlation id, producing the response value.
    pub fn with_context(self, correlation_id: &str, development: bool) -> ApiFailure {
        ApiFailure {
            code: self.status().as_u16(),
            error: self.to_string(),
            stack: development.then(|| source_chain(&self)).flatten(),
            correlation_id: correlation_id.to_string(),
        }
    }
}

fn source_chain(err: &(dyn std::error::Error + 'static)) -> Option<String> {
    let mut chain = Vec::new();
    let mut current = err.source();
    while let Some(source) = current {
        chain.push(source.to_string());
        current = source.source();
    }
    (!chain.is_empty()).then(|| chain.join("\ncaused by: "))
}

/// Body of every error response.
#[derive(Debug, Serialize)]
pub struct ApiFailure {
    pub code: u16,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    pub correlation_id: String,
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}
