//! Consistent response envelope for every endpoint (§6.1).
//!
//! Grounded on the teacher's `api/envelope.rs`: `ApiResponse<T>` /
//! `ApiErrorResponse` with a shared `meta{timestamp, version}` block.
//! Adapted per the §6 HTTP-status rule: validation failures map to 4xx,
//! datastore-outage failures stay at HTTP 200 with `error` populated, so
//! callers must inspect the body's `error` field rather than the status
//! code alone for that case.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::Serialize;

use crate::error::CoreError;

#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    pub timestamp: String,
    pub version: &'static str,
}

impl Default for ResponseMeta {
    fn default() -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            version: "1",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
    pub error: Option<String>,
    pub meta: ResponseMeta,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Response {
        let body = Self {
            data,
            error: None,
            meta: ResponseMeta::default(),
        };
        (StatusCode::OK, axum::Json(body)).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    pub error: ErrorDetail,
    pub meta: ResponseMeta,
}

impl ApiErrorResponse {
    fn build(status: StatusCode, code: &str, msg: impl Into<String>) -> Response {
        let body = Self {
            error: ErrorDetail {
                code: code.to_string(),
                message: msg.into(),
            },
            meta: ResponseMeta::default(),
        };
        (status, axum::Json(body)).into_response()
    }

    /// Translate [`CoreError`] into a response per the §6/§7 rule: only
    /// validation failures are non-200.
    pub fn from_core_error(err: CoreError) -> Response {
        match err {
            CoreError::Validation(msg) => Self::build(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", msg),
            CoreError::DatastoreOutage(msg) => {
                Self::build(StatusCode::OK, "DATASTORE_OUTAGE", msg)
            }
            CoreError::Other(err) => {
                Self::build(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datastore_outage_stays_at_200() {
        let resp = ApiErrorResponse::from_core_error(CoreError::DatastoreOutage("down".into()));
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[test]
    fn validation_failure_is_a_4xx() {
        let resp = ApiErrorResponse::from_core_error(CoreError::Validation("bad city".into()));
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
