use async_trait::async_trait;

use crate::Result;

use super::types::{ChatRequest, ChatResponse};

/// Chat-completion backend used by the planner.
///
/// OpenAI is the production implementation; tests plug in scripted models.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn name(&self) -> &str;

    /// Model used when a request does not name one.
    fn default_model(&self) -> &str;

    async fn complete(&self, req: ChatRequest) -> Result<ChatResponse>;
}
