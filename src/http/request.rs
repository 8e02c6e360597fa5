//! Correlation id handling.
//!
//! # Responsibilities
//! - Assign a correlation id to every request that arrives without one
//! - Echo it back on the response
//! - Read it from requests further down the stack
//!
//! # Design Decisions
//! - Incoming ids are trusted as-is so callers can stitch traces together
//! - The header is `x-correlation-id`; ids are UUID v4 when generated here

use axum::http::{HeaderMap, HeaderName};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

/// Header carrying the correlation id in both directions.
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

fn header_name() -> HeaderName {
    HeaderName::from_static(CORRELATION_ID_HEADER)
}

/// Layer that fills in a missing correlation id.
pub fn set_correlation_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::new(header_name(), MakeRequestUuid)
}

/// Layer that copies the request's correlation id onto the response.
pub fn propagate_correlation_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::new(header_name())
}

/// Correlation id carried by `headers`, if present and printable.
pub fn correlation_id(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(CORRELATION_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn reads_present_header() {
        let mut headers = HeaderMap::new();
        headers.insert(CORRELATION_ID_HEADER, HeaderValue::from_static("abc-123"));
        assert_eq!(correlation_id(&headers), Some("abc-123"));
    }

    #[test]
    fn empty_or_missing_header_is_none() {
        let mut headers = HeaderMap::new();
        assert_eq!(correlation_id(&headers), None);

        headers.insert(CORRELATION_ID_HEADER, HeaderValue::from_static(""));
        assert_eq!(correlation_id(&headers), None);
    }
}
