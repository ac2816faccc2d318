use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

use tab_core::{activity::Activity, bot::TurnOutcome};

use crate::{
    docs::{ActivityBody, ErrorBody},
    error::ApiError,
    state::AppState,
};

/// Acknowledgement returned to the Bot Framework channel.
#[derive(Debug, Serialize, ToSchema)]
pub struct TurnStatus {
    /// `processed` when the bot handled the activity, `ok` otherwise.
    pub status: &'static str,
}

/// `POST /api/messages`: Bot Framework webhook.
#[utoipa::path(
    post,
    path = "/api/messages",
    request_body(content = ActivityBody, description = "Bot Framework activity"),
    responses(
        (status = OK, description = "Activity accepted", body = TurnStatus),
        (status = BAD_REQUEST, description = "Body is not a valid activity", body = ErrorBody),
        (status = UNAUTHORIZED, description = "Missing or invalid bearer token", body = ErrorBody),
    ),
    tag = "bot",
)]
pub async fn messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<TurnStatus>, ApiError> {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    if let Err(e) = state.auth.verify(authorization) {
        tracing::warn!("rejected inbound activity: {e}");
        return Err(ApiError::Unauthorized);
    }

    let activity = Activity::parse(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid activity: {e}")))?;

    tracing::info!(
        kind = activity.kind.as_str(),
        conversation = activity.conversation.id.as_str(),
        channel = activity.channel_id.as_str(),
        "inbound activity"
    );

    let status = match state.bot.on_turn(&activity).await {
        TurnOutcome::Processed => "processed",
        TurnOutcome::Ignored | TurnOutcome::Failed(_) => "ok",
    };
    Ok(Json(TurnStatus { status }))
}
