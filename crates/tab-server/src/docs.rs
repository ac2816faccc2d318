//! OpenAPI description of the HTTP surface, served at `/openapi.json` and browsable at `/docs`.

use axum::Json;
use utoipa::{OpenApi, ToSchema};

use tab_core::health::{HealthEndpoints, HealthReport};

use crate::handlers::{health, messages, test_chat};

pub const DOCS_PATH: &str = "/docs";
pub const OPENAPI_PATH: &str = "/openapi.json";

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Teams AI Bot",
        description = "Microsoft Teams AI bot backed by OpenAI chat completions",
        version = "1.0.0",
    ),
    paths(health::root, health::health, messages::messages, test_chat::test_chat),
    components(schemas(
        health::Liveness,
        HealthReport,
        HealthEndpoints,
        messages::TurnStatus,
        ActivityBody,
        AccountRef,
        TestChatRequest,
        test_chat::TestChatResponse,
        ErrorBody,
    )),
    tags(
        (name = "system", description = "Liveness and deployment details"),
        (name = "bot", description = "Bot Framework webhook and developer chat"),
    ),
)]
pub struct ApiDoc;

/// `GET /openapi.json`
pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Fields of a Bot Framework activity the bot reads. Other fields are accepted and ignored.
#[derive(ToSchema)]
#[schema(rename_all = "camelCase")]
pub struct ActivityBody {
    /// `message`, `invoke`, `conversationUpdate`, ...
    #[schema(rename = "type")]
    pub kind: String,
    pub id: Option<String>,
    pub service_url: String,
    pub channel_id: String,
    pub text: Option<String>,
    pub conversation: AccountRef,
    pub from: AccountRef,
}

#[derive(ToSchema)]
pub struct AccountRef {
    pub id: String,
    pub name: Option<String>,
}

#[derive(ToSchema)]
pub struct TestChatRequest {
    /// Text sent to the model. Must not be empty.
    pub message: String,
}

#[derive(ToSchema)]
pub struct ErrorBody {
    pub error: String,
}
