//! OpenAI adapter (chat completions).
//!
//! Implements the `tab-core` `ChatModel` port over `POST {base}/chat/completions`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use tab_core::{
    errors::Error,
    model::{ChatMessage, ChatModel, ChatRequest, ChatResponse, TokenUsage},
    Result,
};

#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl OpenAiConfig {
    pub fn from_core(cfg: &tab_core::config::Config) -> Self {
        Self {
            api_key: cfg.openai_api_key.clone(),
            model: cfg.openai_model_name.clone(),
            base_url: cfg.openai_base_url.clone(),
            timeout: cfg.openai_timeout,
        }
    }
}

#[derive(Clone, Debug)]
pub struct OpenAiClient {
    cfg: OpenAiConfig,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
}

#[derive(Deserialize)]
struct CompletionReply {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ReplyMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiClient {
    pub fn new(cfg: OpenAiConfig) -> Result<Self> {
        if cfg.api_key.trim().is_empty() {
            return Err(Error::Config("OpenAI API key is empty".to_string()));
        }
        let http = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(|e| Error::External(format!("openai client build error: {e}")))?;
        Ok(Self { cfg, http })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.cfg.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ChatModel for OpenAiClient {
    fn name(&self) -> &str {
        "openai"
    }

    fn default_model(&self) -> &str {
        &self.cfg.model
    }

    async fn complete(&self, req: ChatRequest) -> Result<ChatResponse> {
        let model = req.model.as_deref().unwrap_or(&self.cfg.model);
        let body = CompletionBody {
            model,
            messages: &req.messages,
            max_tokens: req.max_tokens,
            temperature: req.temperature,
            top_p: req.top_p,
            presence_penalty: req.presence_penalty,
            frequency_penalty: req.frequency_penalty,
        };

        let resp = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.cfg.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Model(format!("openai request error: {e}")))?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::Model("openai rate limited".to_string()));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Model(format!(
                "openai chat failed: {status} {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        let reply: CompletionReply = resp
            .json()
            .await
            .map_err(|e| Error::Model(format!("openai json error: {e}")))?;

        let Some(choice) = reply.choices.into_iter().next() else {
            return Err(Error::Model("openai returned no choices".to_string()));
        };

        let content = choice.message.content.unwrap_or_default().trim().to_string();
        tracing::debug!(
            model = model,
            chars = content.len(),
            finish_reason = choice.finish_reason.as_deref().unwrap_or(""),
            "openai completion"
        );

        Ok(ChatResponse {
            content,
            model: reply.model.unwrap_or_else(|| model.to_string()),
            usage: reply.usage,
            finish_reason: choice.finish_reason,
        })
    }
}
