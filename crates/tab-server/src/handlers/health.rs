use std::sync::Arc;

use axum::{extract::State, http::header, response::IntoResponse, Json};
use serde::Serialize;
use utoipa::ToSchema;

use tab_core::health::{HealthEndpoints, HealthReport};

use crate::state::AppState;

pub const SERVICE_NAME: &str = "teams-ai-bot";

/// Body of the plain `/` liveness response.
#[derive(Debug, Serialize, ToSchema)]
pub struct Liveness {
    pub status: &'static str,
    pub message: &'static str,
}

/// `GET /`: liveness.
#[utoipa::path(
    get,
    path = "/",
    responses((status = OK, description = "Process is up", body = Liveness)),
    tag = "system",
)]
pub async fn root() -> Json<Liveness> {
    Json(Liveness {
        status: "healthy",
        message: "Teams AI Bot is running",
    })
}

/// `GET /health`: liveness plus deployment details.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = OK, description = "Liveness with deployment details", body = HealthReport)),
    tag = "system",
)]
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let prompts = match state.bot.planner().prompts().names() {
        Ok(names) => names,
        Err(e) => {
            tracing::warn!("listing prompts failed: {e}");
            Vec::new()
        }
    };

    let report = HealthReport {
        status: "healthy",
        service: SERVICE_NAME,
        port: state.port,
        framework: "axum",
        environment: state.cfg.environment(),
        public_url: state.cfg.public_url(state.port),
        uptime_seconds: state.uptime_secs(),
        prompts,
        endpoints: HealthEndpoints::default(),
    };

    (
        [
            (header::CACHE_CONTROL, "no-store, no-cache, must-revalidate"),
            (header::PRAGMA, "no-cache"),
        ],
        Json(report),
    )
}
