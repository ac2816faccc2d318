use std::{collections::HashMap, sync::Arc};

use crate::{
    errors::Error,
    model::{ChatMessage, ChatModel, ChatRequest, ChatResponse},
    prompts::PromptManager,
    Result,
};

/// System prompt for the unauthenticated developer endpoint.
pub const TEST_MODE_SYSTEM_PROMPT: &str =
    "Та туслах AI дэд юм. Монгол хэлээр хариулна уу. Найрсаг, тусламжтай байгаарай.";
pub const TEST_MODE_MAX_TOKENS: u32 = 500;
pub const TEST_MODE_TEMPERATURE: f32 = 0.7;

/// Turns a user message plus conversation history into a model completion.
pub struct ActionPlanner {
    model: Arc<dyn ChatModel>,
    prompts: Arc<PromptManager>,
    default_prompt: String,
}

impl ActionPlanner {
    pub fn new(
        model: Arc<dyn ChatModel>,
        prompts: Arc<PromptManager>,
        default_prompt: impl Into<String>,
    ) -> Self {
        Self {
            model,
            prompts,
            default_prompt: default_prompt.into(),
        }
    }

    pub fn prompts(&self) -> &PromptManager {
        &self.prompts
    }

    /// Run the default prompt for `input`.
    pub async fn plan(
        &self,
        input: &str,
        history: &[ChatMessage],
        vars: &HashMap<String, String>,
    ) -> Result<ChatResponse> {
        let req = self.build_request(input, history, vars)?;
        tracing::debug!(
            backend = self.model.name(),
            model = req.model.as_deref().unwrap_or(self.model.default_model()),
            messages = req.messages.len(),
            "planning completion"
        );
        let resp = self.model.complete(req).await?;
        if resp.content.trim().is_empty() {
            return Err(Error::Model(format!(
                "{} returned an empty completion",
                self.model.name()
            )));
        }
        Ok(resp)
    }

    /// Assemble the chat request without calling the model.
    pub fn build_request(
        &self,
        input: &str,
        history: &[ChatMessage],
        vars: &HashMap<String, String>,
    ) -> Result<ChatRequest> {
        let template = self.prompts.get(&self.default_prompt)?;
        let cfg = &template.completion;

        let mut vars = vars.clone();
        vars.insert("input".to_string(), input.to_string());

        let mut messages = Vec::with_capacity(history.len() + 2);
        let system = template.render(&vars);
        if !system.is_empty() {
            messages.push(ChatMessage::system(system));
        }
        if cfg.include_history {
            messages.extend(history.iter().cloned());
        }
        if cfg.include_input {
            messages.push(ChatMessage::user(input));
        }

        Ok(ChatRequest {
            model: cfg.model.clone(),
            messages,
            max_tokens: Some(cfg.max_tokens),
            temperature: Some(cfg.temperature),
            top_p: cfg.top_p,
            presence_penalty: cfg.presence_penalty,
            frequency_penalty: cfg.frequency_penalty,
        })
    }

    /// One-shot completion with the fixed developer system prompt and no history.
    pub async fn complete_test(&self, input: &str) -> Result<String> {
        let req = ChatRequest {
            messages: vec![
                ChatMessage::system(TEST_MODE_SYSTEM_PROMPT),
                ChatMessage::user(input),
            ],
            max_tokens: Some(TEST_MODE_MAX_TOKENS),
            temperature: Some(TEST_MODE_TEMPERATURE),
            ..ChatRequest::default()
        };
        let resp = self.model.complete(req).await?;
        Ok(resp.content.trim().to_string())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{fs, path::PathBuf, sync::Mutex, time::Duration};

    use async_trait::async_trait;

    use crate::model::{Role, TokenUsage};

    use super::*;

    /// Scripted model: pops replies in order and records every request.
    pub(crate) struct ScriptedModel {
        replies: Mutex<Vec<Result<String>>>,
        pub(crate) seen: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedModel {
        pub(crate) fn new(replies: Vec<Result<String>>) -> Self {
            let mut replies = replies;
            replies.reverse();
            Self {
                replies: Mutex::new(replies),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        fn name(&self) -> &str {
            "scripted"
        }

        fn default_model(&self) -> &str {
            "scripted-1"
        }

        async fn complete(&self, req: ChatRequest) -> Result<ChatResponse> {
            self.seen.lock().unwrap().push(req);
            let next = self
                .replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(Error::Model("script exhausted".to_string())));
            next.map(|content| ChatResponse {
                content,
                model: "scripted-1".to_string(),
                usage: Some(TokenUsage::default()),
                finish_reason: Some("stop".to_string()),
            })
        }
    }

    pub(crate) fn prompts_dir(template: &str, config: Option<&str>) -> PathBuf {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or(Duration::from_secs(0))
            .as_nanos();
        let dir = PathBuf::from(format!("/tmp/tab-planner-{}-{ts}", std::process::id()));
        fs::create_dir_all(dir.join("chat")).unwrap();
        fs::write(dir.join("chat/skprompt.txt"), template).unwrap();
        if let Some(c) = config {
            fs::write(dir.join("chat/config.json"), c).unwrap();
        }
        dir
    }

    fn planner(model: Arc<ScriptedModel>, dir: PathBuf) -> ActionPlanner {
        ActionPlanner::new(model, Arc::new(PromptManager::new(dir)), "chat")
    }

    #[tokio::test]
    async fn plan_orders_system_history_input() {
        let model = Arc::new(ScriptedModel::new(vec![Ok("answer".to_string())]));
        let p = planner(
            model.clone(),
            prompts_dir("You help {{$user}}.", Some(r#"{"completion":{"max_tokens":321}}"#)),
        );

        let history = vec![ChatMessage::user("q0"), ChatMessage::assistant("a0")];
        let vars = HashMap::from([("user".to_string(), "Bat".to_string())]);
        let resp = p.plan("q1", &history, &vars).await.unwrap();
        assert_eq!(resp.content, "answer");

        let seen = model.seen.lock().unwrap();
        let req = &seen[0];
        assert_eq!(req.max_tokens, Some(321));
        let roles: Vec<Role> = req.messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::User]
        );
        assert_eq!(req.messages[0].content, "You help Bat.");
        assert_eq!(req.messages[3].content, "q1");
    }

    #[tokio::test]
    async fn history_can_be_disabled_by_prompt_config() {
        let model = Arc::new(ScriptedModel::new(vec![]));
        let p = planner(
            model,
            prompts_dir("sys", Some(r#"{"completion":{"include_history":false}}"#)),
        );
        let history = vec![ChatMessage::user("old"), ChatMessage::assistant("old")];
        let req = p.build_request("new", &history, &HashMap::new()).unwrap();
        assert_eq!(req.messages.len(), 2);
    }

    #[tokio::test]
    async fn empty_completion_is_an_error() {
        let model = Arc::new(ScriptedModel::new(vec![Ok("   ".to_string())]));
        let p = planner(model, prompts_dir("sys", None));
        let err = p.plan("hi", &[], &HashMap::new()).await.unwrap_err();
        assert!(matches!(err, Error::Model(_)));
    }

    #[tokio::test]
    async fn missing_prompt_surfaces_prompt_error() {
        let model = Arc::new(ScriptedModel::new(vec![Ok("x".to_string())]));
        let p = ActionPlanner::new(
            model,
            Arc::new(PromptManager::new("/tmp/tab-no-such-prompts")),
            "chat",
        );
        let err = p.plan("hi", &[], &HashMap::new()).await.unwrap_err();
        assert!(matches!(err, Error::Prompt(_)));
    }

    #[tokio::test]
    async fn test_mode_uses_fixed_settings() {
        let model = Arc::new(ScriptedModel::new(vec![Ok("  Сайн байна уу  ".to_string())]));
        let p = planner(model.clone(), prompts_dir("ignored", None));

        let out = p.complete_test("hello").await.unwrap();
        assert_eq!(out, "Сайн байна уу");

        let seen = model.seen.lock().unwrap();
        assert_eq!(seen[0].max_tokens, Some(TEST_MODE_MAX_TOKENS));
        assert_eq!(seen[0].temperature, Some(TEST_MODE_TEMPERATURE));
        assert_eq!(seen[0].messages[0].content, TEST_MODE_SYSTEM_PROMPT);
    }
}
