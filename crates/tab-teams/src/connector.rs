use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use tab_core::{activity::Activity, connector::ConnectorPort, errors::Error, Result};

use crate::auth::TokenProvider;

#[derive(Deserialize)]
struct ResourceResponse {
    #[serde(default)]
    id: Option<String>,
}

/// Bot Framework connector client (`{serviceUrl}/v3/conversations/...`).
#[derive(Clone)]
pub struct ConnectorClient {
    http: reqwest::Client,
    tokens: Arc<TokenProvider>,
}

impl ConnectorClient {
    pub fn new(http: reqwest::Client, tokens: Arc<TokenProvider>) -> Self {
        Self { http, tokens }
    }

    /// Reply endpoint for `activity`: threaded under `replyToId` when present.
    pub fn activity_url(activity: &Activity) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&activity.service_url).map_err(|e| {
            Error::External(format!(
                "invalid serviceUrl {:?}: {e}",
                activity.service_url
            ))
        })?;

        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                Error::External(format!(
                    "serviceUrl cannot be a base: {}",
                    activity.service_url
                ))
            })?;
            segments.pop_if_empty().extend([
                "v3",
                "conversations",
                activity.conversation.id.as_str(),
                "activities",
            ]);
            if let Some(reply_to) = activity.reply_to_id.as_deref() {
                segments.push(reply_to);
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl ConnectorPort for ConnectorClient {
    async fn send_activity(&self, activity: &Activity) -> Result<Option<String>> {
        let url = Self::activity_url(activity)?;

        let mut req = self.http.post(url.clone()).json(activity);
        if let Some(token) = self.tokens.token().await? {
            req = req.bearer_auth(token);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| Error::External(format!("connector request error: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::External(format!(
                "connector rejected activity: {status} {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        // Some channels answer 201/202 with an empty body.
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Error::External(format!("connector read error: {e}")))?;
        let id = serde_json::from_slice::<ResourceResponse>(&bytes)
            .ok()
            .and_then(|r| r.id);

        tracing::debug!(url = %url, id = id.as_deref().unwrap_or(""), "activity sent");
        Ok(id)
    }
}
