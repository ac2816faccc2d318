//! Bot Framework activity schema (the subset the bot reads and writes).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{domain::ConversationId, errors::Error, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ActivityType {
    Message,
    ConversationUpdate,
    Invoke,
    Typing,
    Other(String),
}

impl ActivityType {
    pub fn as_str(&self) -> &str {
        match self {
            ActivityType::Message => "message",
            ActivityType::ConversationUpdate => "conversationUpdate",
            ActivityType::Invoke => "invoke",
            ActivityType::Typing => "typing",
            ActivityType::Other(s) => s,
        }
    }
}

impl From<&str> for ActivityType {
    fn from(s: &str) -> Self {
        match s {
            "message" => ActivityType::Message,
            "conversationUpdate" => ActivityType::ConversationUpdate,
            "invoke" => ActivityType::Invoke,
            "typing" => ActivityType::Typing,
            other => ActivityType::Other(other.to_string()),
        }
    }
}

impl Serialize for ActivityType {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ActivityType {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        Ok(ActivityType::from(s.as_str()))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelAccount {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aad_object_id: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationAccount {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

/// A Bot Framework activity.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    #[serde(rename = "type")]
    pub kind: ActivityType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub service_url: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub from: ChannelAccount,
    #[serde(default)]
    pub recipient: ChannelAccount,
    #[serde(default)]
    pub conversation: ConversationAccount,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members_added: Vec<ChannelAccount>,
}

impl Activity {
    pub fn parse(body: &[u8]) -> Result<Self> {
        let activity: Activity = serde_json::from_slice(body)?;
        if activity.conversation.id.trim().is_empty()
            && activity.kind != ActivityType::Typing
        {
            return Err(Error::External(
                "activity is missing conversation.id".to_string(),
            ));
        }
        Ok(activity)
    }

    pub fn conversation_id(&self) -> ConversationId {
        ConversationId(self.conversation.id.clone())
    }

    /// Message text with Teams `<at>bot</at>` mentions removed and whitespace trimmed.
    pub fn clean_text(&self) -> Option<String> {
        let raw = self.text.as_deref()?;
        let cleaned = strip_mentions(raw);
        if cleaned.is_empty() {
            None
        } else {
            Some(cleaned)
        }
    }

    /// Build a reply addressed back to the sender of this activity.
    pub fn create_reply(&self, text: impl Into<String>) -> Activity {
        Activity {
            kind: ActivityType::Message,
            id: None,
            timestamp: Some(Utc::now()),
            service_url: self.service_url.clone(),
            channel_id: self.channel_id.clone(),
            from: self.recipient.clone(),
            recipient: self.from.clone(),
            conversation: self.conversation.clone(),
            text: Some(text.into()),
            text_format: Some("plain".to_string()),
            reply_to_id: self.id.clone(),
            name: None,
            value: None,
            channel_data: None,
            locale: self.locale.clone(),
            members_added: Vec::new(),
        }
    }

    pub fn with_channel_data(mut self, data: serde_json::Value) -> Self {
        self.channel_data = Some(data);
        self
    }

    /// True when someone other than the bot itself joined the conversation.
    pub fn adds_members_other_than_bot(&self) -> bool {
        self.members_added
            .iter()
            .any(|m| m.id != self.recipient.id)
    }
}

fn strip_mentions(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find("<at>") {
        out.push_str(&rest[..start]);
        match rest[start..].find("</at>") {
            Some(end) => rest = &rest[start + end + "</at>".len()..],
            None => {
                rest = &rest[start..];
                break;
            }
        }
    }
    out.push_str(rest);
    out.trim().to_string()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackReaction {
    Like,
    Dislike,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackActionValue {
    pub reaction: FeedbackReaction,
    #[serde(default)]
    pub feedback: String,
}

/// Thumbs up/down feedback submitted from a Teams message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackLoopData {
    pub action_name: String,
    pub action_value: FeedbackActionValue,
    pub reply_to_id: Option<String>,
}

impl FeedbackLoopData {
    pub const INVOKE_NAME: &'static str = "message/submitAction";

    /// Extract feedback from an `invoke` activity, if it is one.
    pub fn from_activity(activity: &Activity) -> Option<Self> {
        if activity.kind != ActivityType::Invoke
            || activity.name.as_deref() != Some(Self::INVOKE_NAME)
        {
            return None;
        }

        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Value {
            action_name: String,
            action_value: serde_json::Value,
        }

        let value: Value = serde_json::from_value(activity.value.clone()?).ok()?;
        if value.action_name != "feedback" {
            return None;
        }

        // Teams sends `feedback` as a JSON string inside the action value.
        let reaction: FeedbackReaction =
            serde_json::from_value(value.action_value.get("reaction")?.clone()).ok()?;
        let feedback = match value.action_value.get("feedback") {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };

        Some(Self {
            action_name: value.action_name,
            action_value: FeedbackActionValue { reaction, feedback },
            reply_to_id: activity.reply_to_id.clone(),
        })
    }
}
