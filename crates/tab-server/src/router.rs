use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::{
    docs::{self, ApiDoc},
    error::panic_response,
    handlers::{health, messages, test_chat},
    state::AppState,
};

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(health::root))
        .route("/health", get(health::health))
        .route("/api/messages", post(messages::messages))
        .route("/api/test", post(test_chat::test_chat))
        .route(docs::OPENAPI_PATH, get(docs::openapi_json))
        .with_state(state)
        .merge(Scalar::with_url(docs::DOCS_PATH, ApiDoc::openapi()))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
}
