use std::sync::Arc;

use axum::{body::Bytes, extract::State, Json};
use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

use crate::{
    docs::{ErrorBody, TestChatRequest},
    error::ApiError,
    state::AppState,
};

pub const TEST_MODE_NOTE: &str = "Development test mode - authentication bypass";

#[derive(Debug, Serialize, ToSchema)]
pub struct TestChatResponse {
    pub status: &'static str,
    pub user_message: String,
    /// Model reply, or a readable error when the model call failed.
    pub bot_response: String,
    pub note: &'static str,
}

/// `POST /api/test`: talk to the model without the Bot Framework. No auth.
#[utoipa::path(
    post,
    path = "/api/test",
    request_body = TestChatRequest,
    responses(
        (status = OK, description = "Model reply", body = TestChatResponse),
        (status = BAD_REQUEST, description = "`message` missing or empty", body = ErrorBody),
        (status = INTERNAL_SERVER_ERROR, description = "Body is not a JSON object", body = ErrorBody),
    ),
    tag = "bot",
)]
pub async fn test_chat(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<TestChatResponse>, ApiError> {
    let body: Value =
        serde_json::from_slice(&body).map_err(|e| ApiError::TestMode(e.to_string()))?;
    let Value::Object(fields) = body else {
        return Err(ApiError::TestMode("expected a JSON object".to_string()));
    };

    let user_message = match fields.get("message") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        _ => return Err(ApiError::BadRequest("message field is required".to_string())),
    };

    let bot_response = state.bot.test_message(&user_message).await;

    Ok(Json(TestChatResponse {
        status: "success",
        user_message,
        bot_response,
        note: TEST_MODE_NOTE,
    }))
}
