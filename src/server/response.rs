//! Mapping of prediction outcomes onto HTTP responses.

use crate::constants::headers;
use crate::error::PredictError;
use crate::ratelimit::RateLimitDecision;
use axum::Json;
use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for PredictError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let retry_after = match &self {
            Self::RateLimitExceeded(decision) => {
                Some(decision.retry_after_secs(chrono::Utc::now().timestamp_millis()))
            }
            _ => None,
        };

        let mut response = (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response();

        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

/// Attach the `X-RateLimit-*` headers for a decision.
pub fn apply_rate_limit_headers(map: &mut HeaderMap, decision: &RateLimitDecision) {
    map.insert(headers::LIMIT, HeaderValue::from(decision.limit));
    map.insert(headers::REMAINING, HeaderValue::from(decision.remaining));
    map.insert(headers::RESET, HeaderValue::from(decision.reset_at));
}
