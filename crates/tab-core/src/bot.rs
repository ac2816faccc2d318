//! Turn handling: one inbound activity in, at most one reply out.

use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::Utc;

use serde_json::json;

use crate::{
    activity::{Activity, ActivityType, FeedbackLoopData},
    connector::ConnectorPort,
    conversation::{ConversationLocks, MemoryStorage},
    planner::ActionPlanner,
    Result,
};

/// Message sent to the user when a turn fails.
pub const TURN_ERROR_MESSAGE: &str = "The agent encountered an error or bug.";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The activity was handled (a reply was produced or feedback recorded).
    Processed,
    /// Nothing to do for this activity.
    Ignored,
    /// The turn failed; the user was told (best-effort).
    Failed(String),
}

#[derive(Clone, Copy, Debug)]
pub struct BotOptions {
    /// Post replies to the connector. When false replies are only logged.
    pub reply_enabled: bool,
    /// Mark replies as accepting thumbs up/down feedback.
    pub feedback_loop_enabled: bool,
}

impl Default for BotOptions {
    fn default() -> Self {
        Self {
            reply_enabled: true,
            feedback_loop_enabled: true,
        }
    }
}

pub struct BotApplication {
    planner: ActionPlanner,
    storage: MemoryStorage,
    locks: ConversationLocks,
    connector: Arc<dyn ConnectorPort>,
    opts: BotOptions,
}

impl BotApplication {
    pub fn new(
        planner: ActionPlanner,
        storage: MemoryStorage,
        connector: Arc<dyn ConnectorPort>,
        opts: BotOptions,
    ) -> Self {
        Self {
            planner,
            storage,
            locks: ConversationLocks::default(),
            connector,
            opts,
        }
    }

    pub fn planner(&self) -> &ActionPlanner {
        &self.planner
    }

    pub fn storage(&self) -> &MemoryStorage {
        &self.storage
    }

    /// Forget conversations with no activity for `ttl`, and their idle locks.
    pub async fn evict_idle(&self, ttl: Duration) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_sub_signed(ttl))
        else {
            return 0;
        };
        let evicted = self.storage.evict_idle(cutoff).await;
        let locks = self.locks.prune().await;
        if evicted > 0 {
            tracing::info!(evicted, locks, "evicted idle conversations");
        }
        evicted
    }

    /// Handle one inbound activity. Never returns an error: failures are logged
    /// and reported to the user as `TurnOutcome::Failed`.
    pub async fn on_turn(&self, activity: &Activity) -> TurnOutcome {
        match self.dispatch(activity).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(
                    conversation = %activity.conversation.id,
                    activity_type = activity.kind.as_str(),
                    "unhandled turn error: {e}"
                );
                let notice = activity.create_reply(TURN_ERROR_MESSAGE);
                if let Err(send_err) = self.deliver(&notice).await {
                    tracing::warn!("failed to send turn error notice: {send_err}");
                }
                TurnOutcome::Failed(e.to_string())
            }
        }
    }

    async fn dispatch(&self, activity: &Activity) -> Result<TurnOutcome> {
        match &activity.kind {
            ActivityType::Message => self.on_message(activity).await,
            ActivityType::ConversationUpdate => {
                if activity.adds_members_other_than_bot()
                    && self.storage.clear(&activity.conversation_id()).await
                {
                    tracing::info!(
                        conversation = %activity.conversation.id,
                        "members added; conversation state reset"
                    );
                }
                Ok(TurnOutcome::Ignored)
            }
            ActivityType::Invoke => match FeedbackLoopData::from_activity(activity) {
                Some(feedback) => {
                    self.on_feedback(activity, feedback);
                    Ok(TurnOutcome::Processed)
                }
                None => Ok(TurnOutcome::Ignored),
            },
            ActivityType::Typing | ActivityType::Other(_) => Ok(TurnOutcome::Ignored),
        }
    }

    async fn on_message(&self, activity: &Activity) -> Result<TurnOutcome> {
        let Some(text) = activity.clean_text() else {
            return Ok(TurnOutcome::Ignored);
        };

        let id = activity.conversation_id();
        let _guard = self.locks.lock(&id).await;

        let state = self.storage.load(&id).await;
        let vars = turn_vars(activity);
        let resp = self.planner.plan(&text, &state.history, &vars).await?;
        self.storage.append_turn(&id, &text, &resp.content).await;

        tracing::info!(
            conversation = %id,
            model = %resp.model,
            turns = state.turn_count + 1,
            "generated reply"
        );

        let mut reply = activity.create_reply(resp.content);
        if self.opts.feedback_loop_enabled {
            reply = reply.with_channel_data(json!({ "feedbackLoopEnabled": true }));
        }
        self.deliver(&reply).await?;
        Ok(TurnOutcome::Processed)
    }

    fn on_feedback(&self, activity: &Activity, feedback: FeedbackLoopData) {
        match serde_json::to_string_pretty(&feedback) {
            Ok(pretty) => tracing::info!(
                conversation = %activity.conversation.id,
                "feedback received:\n{pretty}"
            ),
            Err(e) => tracing::warn!("feedback could not be serialized: {e}"),
        }
    }

    async fn deliver(&self, reply: &Activity) -> Result<()> {
        if !self.opts.reply_enabled {
            tracing::info!(
                conversation = %reply.conversation.id,
                text = reply.text.as_deref().unwrap_or(""),
                "reply not sent (replies disabled)"
            );
            return Ok(());
        }
        self.connector.send_activity(reply).await?;
        Ok(())
    }

    /// Developer path: call the model directly, bypassing the bot framework.
    ///
    /// Model failures are folded into the returned text.
    pub async fn test_message(&self, text: &str) -> String {
        match self.planner.complete_test(text).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!("test mode completion failed: {e}");
                format!("OpenAI API error: {e}")
            }
        }
    }
}

fn turn_vars(activity: &Activity) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    if let Some(name) = &activity.from.name {
        vars.insert("userName".to_string(), name.clone());
    }
    if let Some(name) = &activity.recipient.name {
        vars.insert("botName".to_string(), name.clone());
    }
    if let Some(locale) = &activity.locale {
        vars.insert("locale".to_string(), locale.clone());
    }
    vars
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use crate::{
        errors::Error,
        planner::tests::{prompts_dir, ScriptedModel},
        prompts::PromptManager,
    };

    use super::*;

    #[derive(Default)]
    struct RecordingConnector {
        sent: Mutex<Vec<Activity>>,
        fail: bool,
    }

    #[async_trait]
    impl ConnectorPort for RecordingConnector {
        async fn send_activity(&self, activity: &Activity) -> Result<Option<String>> {
            if self.fail {
                return Err(Error::External("connector down".to_string()));
            }
            self.sent.lock().unwrap().push(activity.clone());
            Ok(Some("sent-1".to_string()))
        }
    }

    fn bot(
        replies: Vec<Result<String>>,
        connector: Arc<RecordingConnector>,
        opts: BotOptions,
    ) -> BotApplication {
        let model = Arc::new(ScriptedModel::new(replies));
        let prompts = Arc::new(PromptManager::new(prompts_dir("Talk to {{$userName}}", None)));
        BotApplication::new(
            ActionPlanner::new(model, prompts, "chat"),
            MemoryStorage::new(10),
            connector,
            opts,
        )
    }

    fn activity(kind: &str, text: Option<&str>) -> Activity {
        serde_json::from_value(json!({
            "type": kind,
            "id": "act-1",
            "serviceUrl": "http://localhost:9/",
            "channelId": "msteams",
            "from": { "id": "29:user", "name": "Bat" },
            "recipient": { "id": "28:bot", "name": "Bot" },
            "conversation": { "id": "conv-1" },
            "text": text,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn message_produces_reply_and_history() {
        let conn = Arc::new(RecordingConnector::default());
        let b = bot(vec![Ok("Hello Bat".to_string())], conn.clone(), BotOptions::default());

        let out = b.on_turn(&activity("message", Some("hi"))).await;
        assert_eq!(out, TurnOutcome::Processed);

        let sent = conn.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].text.as_deref(), Some("Hello Bat"));
        assert_eq!(sent[0].reply_to_id.as_deref(), Some("act-1"));
        assert_eq!(
            sent[0].channel_data.as_ref().unwrap()["feedbackLoopEnabled"],
            true
        );
        drop(sent);

        let state = b.storage().load(&"conv-1".into()).await;
        assert_eq!(state.history.len(), 2);
    }

    #[tokio::test]
    async fn idle_conversations_are_forgotten() {
        let conn = Arc::new(RecordingConnector::default());
        let b = bot(vec![Ok("Hello Bat".to_string())], conn, BotOptions::default());
        b.on_turn(&activity("message", Some("hi"))).await;

        assert_eq!(b.evict_idle(Duration::from_secs(3600)).await, 0);
        assert_eq!(b.storage().len().await, 1);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(b.evict_idle(Duration::from_millis(10)).await, 1);
        assert!(b.storage().is_empty().await);
    }

    #[tokio::test]
    async fn replies_disabled_still_updates_history() {
        let conn = Arc::new(RecordingConnector::default());
        let b = bot(
            vec![Ok("ok".to_string())],
            conn.clone(),
            BotOptions {
                reply_enabled: false,
                feedback_loop_enabled: true,
            },
        );

        assert_eq!(
            b.on_turn(&activity("message", Some("hi"))).await,
            TurnOutcome::Processed
        );
        assert!(conn.sent.lock().unwrap().is_empty());
        assert_eq!(b.storage().load(&"conv-1".into()).await.turn_count, 1);
    }

    #[tokio::test]
    async fn model_failure_notifies_user() {
        let conn = Arc::new(RecordingConnector::default());
        let b = bot(
            vec![Err(Error::Model("boom".to_string()))],
            conn.clone(),
            BotOptions::default(),
        );

        let out = b.on_turn(&activity("message", Some("hi"))).await;
        assert!(matches!(out, TurnOutcome::Failed(ref m) if m.contains("boom")));

        let sent = conn.sent.lock().unwrap();
        assert_eq!(sent[0].text.as_deref(), Some(TURN_ERROR_MESSAGE));
        drop(sent);
        assert!(b.storage().is_empty().await);
    }

    #[tokio::test]
    async fn connector_failure_is_reported_not_panicked() {
        let conn = Arc::new(RecordingConnector {
            fail: true,
            ..RecordingConnector::default()
        });
        let b = bot(vec![Ok("ok".to_string())], conn, BotOptions::default());
        let out = b.on_turn(&activity("message", Some("hi"))).await;
        assert!(matches!(out, TurnOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn non_message_activities_are_ignored() {
        let conn = Arc::new(RecordingConnector::default());
        let b = bot(vec![], conn.clone(), BotOptions::default());

        assert_eq!(b.on_turn(&activity("typing", None)).await, TurnOutcome::Ignored);
        assert_eq!(
            b.on_turn(&activity("message", Some("<at>Bot</at>"))).await,
            TurnOutcome::Ignored
        );
        assert_eq!(
            b.on_turn(&activity("invoke", None)).await,
            TurnOutcome::Ignored
        );
        assert!(conn.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn feedback_invoke_is_processed() {
        let conn = Arc::new(RecordingConnector::default());
        let b = bot(vec![], conn, BotOptions::default());

        let mut a = activity("invoke", None);
        a.name = Some(FeedbackLoopData::INVOKE_NAME.to_string());
        a.value = Some(json!({
            "actionName": "feedback",
            "actionValue": { "reaction": "like", "feedback": "great" }
        }));
        assert_eq!(b.on_turn(&a).await, TurnOutcome::Processed);
    }

    #[tokio::test]
    async fn members_added_resets_conversation() {
        let conn = Arc::new(RecordingConnector::default());
        let b = bot(vec![Ok("a".to_string())], conn, BotOptions::default());
        b.on_turn(&activity("message", Some("hi"))).await;
        assert_eq!(b.storage().len().await, 1);

        let mut update = activity("conversationUpdate", None);
        update.members_added = vec![crate::activity::ChannelAccount {
            id: "29:new".to_string(),
            ..Default::default()
        }];
        assert_eq!(b.on_turn(&update).await, TurnOutcome::Ignored);
        assert!(b.storage().is_empty().await);
    }

    #[tokio::test]
    async fn test_message_folds_errors_into_text() {
        let conn = Arc::new(RecordingConnector::default());
        let b = bot(
            vec![Ok("fine".to_string()), Err(Error::Model("quota".to_string()))],
            conn,
            BotOptions::default(),
        );
        assert_eq!(b.test_message("a").await, "fine");
        let err_text = b.test_message("b").await;
        assert!(err_text.starts_with("OpenAI API error:"));
        assert!(err_text.contains("quota"));
    }
}
