use std::any::Any;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Errors surfaced to HTTP clients.
#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    BadRequest(String),
    /// Failures of the developer test endpoint, reported verbatim.
    TestMode(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, json!({ "error": "unauthorized" })),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            Self::TestMode(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": format!("Test mode error: {msg}") }),
            ),
            Self::Internal(detail) => {
                tracing::error!(detail = %detail, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Internal server error", "detail": detail }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

/// `CatchPanicLayer` hook: a panicking handler becomes a JSON 500.
pub fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "handler panicked".to_string()
    };
    ApiError::Internal(detail).into_response()
}
