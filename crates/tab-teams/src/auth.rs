use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;

use tab_core::{errors::Error, Result};

use crate::credentials::{AppType, BotCredentials};

pub const BOT_FRAMEWORK_SCOPE: &str = "https://api.botframework.com/.default";
pub const BOT_FRAMEWORK_RESOURCE: &str = "https://api.botframework.com";
pub const DEFAULT_LOGIN_BASE: &str = "https://login.microsoftonline.com";
pub const DEFAULT_IMDS_URL: &str = "http://169.254.169.254/metadata/identity/oauth2/token";

/// Tokens are refreshed this many seconds before they expire.
const REFRESH_MARGIN_SECS: i64 = 5 * 60;

#[derive(Clone, Debug)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + chrono::Duration::seconds(REFRESH_MARGIN_SECS) < self.expires_at
    }
}

#[derive(Deserialize)]
struct TokenReply {
    access_token: String,
    // AAD returns a number, IMDS returns a string.
    #[serde(default)]
    expires_in: Option<serde_json::Value>,
}

impl TokenReply {
    fn expires_in_secs(&self) -> i64 {
        match &self.expires_in {
            Some(serde_json::Value::Number(n)) => n.as_i64().unwrap_or(3600),
            Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or(3600),
            _ => 3600,
        }
    }
}

/// Acquires and caches outbound Bot Framework access tokens.
pub struct TokenProvider {
    creds: BotCredentials,
    http: reqwest::Client,
    login_base: String,
    imds_url: String,
    cache: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    pub fn new(creds: BotCredentials, http: reqwest::Client) -> Self {
        Self {
            creds,
            http,
            login_base: DEFAULT_LOGIN_BASE.to_string(),
            imds_url: DEFAULT_IMDS_URL.to_string(),
            cache: Mutex::new(None),
        }
    }

    /// Point token requests at another authority (sovereign clouds, tests).
    pub fn with_login_base(mut self, base: impl Into<String>) -> Self {
        self.login_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_imds_url(mut self, url: impl Into<String>) -> Self {
        self.imds_url = url.into();
        self
    }

    /// Bearer token for connector calls, or `None` for anonymous credentials.
    pub async fn token(&self) -> Result<Option<String>> {
        if self.creds.is_anonymous() {
            return Ok(None);
        }

        let mut cache = self.cache.lock().await;
        let now = Utc::now();
        if let Some(t) = cache.as_ref().filter(|t| t.is_fresh(now)) {
            return Ok(Some(t.value.clone()));
        }

        let reply = match self.creds.app_type {
            AppType::UserAssignedMsi => self.fetch_managed_identity().await?,
            AppType::MultiTenant | AppType::SingleTenant => {
                self.fetch_client_credentials().await?
            }
        };

        let expires_at = now + chrono::Duration::seconds(reply.expires_in_secs());
        tracing::debug!(expires_at = %expires_at, "acquired bot framework token");
        *cache = Some(CachedToken {
            value: reply.access_token.clone(),
            expires_at,
        });
        Ok(Some(reply.access_token))
    }

    async fn fetch_client_credentials(&self) -> Result<TokenReply> {
        let url = format!(
            "{}/{}/oauth2/v2.0/token",
            self.login_base,
            self.creds.token_tenant()
        );
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.creds.app_id.as_str()),
            ("client_secret", self.creds.app_password.as_str()),
            ("scope", BOT_FRAMEWORK_SCOPE),
        ];
        let resp = self
            .http
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|e| Error::Auth(format!("token request error: {e}")))?;
        Self::read_reply(resp).await
    }

    async fn fetch_managed_identity(&self) -> Result<TokenReply> {
        let resp = self
            .http
            .get(&self.imds_url)
            .header("Metadata", "true")
            .query(&[
                ("api-version", "2018-02-01"),
                ("resource", BOT_FRAMEWORK_RESOURCE),
                ("client_id", self.creds.app_id.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::Auth(format!("managed identity token error: {e}")))?;
        Self::read_reply(resp).await
    }

    async fn read_reply(resp: reqwest::Response) -> Result<TokenReply> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Auth(format!(
                "token endpoint returned {status}: {}",
                body.chars().take(200).collect::<String>()
            )));
        }
        resp.json::<TokenReply>()
            .await
            .map_err(|e| Error::Auth(format!("token json error: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use axum::{
        extract::{Path, State},
        routing::post,
        Form, Json, Router,
    };
    use serde_json::json;

    use super::*;

    type Forms = Arc<std::sync::Mutex<Vec<(String, Vec<(String, String)>)>>>;

    async fn fake_login(expires_in: i64) -> (String, Forms, Arc<AtomicUsize>) {
        let forms: Forms = Arc::new(std::sync::Mutex::new(Vec::new()));
        let hits = Arc::new(AtomicUsize::new(0));

        let app = Router::new()
            .route(
                "/:tenant/oauth2/v2.0/token",
                post(
                    move |State((forms, hits)): State<(Forms, Arc<AtomicUsize>)>,
                     Path(tenant): Path<String>,
                     Form(form): Form<Vec<(String, String)>>| async move {
                        let n = hits.fetch_add(1, Ordering::SeqCst);
                        forms.lock().unwrap().push((tenant, form));
                        Json(json!({
                            "token_type": "Bearer",
                            "expires_in": expires_in,
                            "access_token": format!("token-{n}")
                        }))
                    },
                ),
            )
            .with_state((forms.clone(), hits.clone()));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), forms, hits)
    }

    fn creds(app_type: AppType) -> BotCredentials {
        BotCredentials {
            app_id: "app-id".to_string(),
            app_password: "secret".to_string(),
            app_type,
            tenant_id: "tenant-1".to_string(),
        }
    }

    #[tokio::test]
    async fn anonymous_credentials_have_no_token() {
        let mut c = creds(AppType::MultiTenant);
        c.app_id.clear();
        let p = TokenProvider::new(c, reqwest::Client::new());
        assert_eq!(p.token().await.unwrap(), None);
    }

    #[tokio::test]
    async fn client_credentials_flow_is_cached() {
        let (base, forms, hits) = fake_login(3600).await;
        let p = TokenProvider::new(creds(AppType::MultiTenant), reqwest::Client::new())
            .with_login_base(base);

        assert_eq!(p.token().await.unwrap().as_deref(), Some("token-0"));
        assert_eq!(p.token().await.unwrap().as_deref(), Some("token-0"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let forms = forms.lock().unwrap();
        let (tenant, form) = &forms[0];
        assert_eq!(tenant, "botframework.com");
        let get = |k: &str| {
            form.iter()
                .find(|(key, _)| key == k)
                .map(|(_, v)| v.clone())
        };
        assert_eq!(get("grant_type").as_deref(), Some("client_credentials"));
        assert_eq!(get("client_id").as_deref(), Some("app-id"));
        assert_eq!(get("scope").as_deref(), Some(BOT_FRAMEWORK_SCOPE));
    }

    #[tokio::test]
    async fn near_expiry_token_is_refreshed() {
        // Expires inside the refresh margin, so every call refetches.
        let (base, _, hits) = fake_login(60).await;
        let p = TokenProvider::new(creds(AppType::SingleTenant), reqwest::Client::new())
            .with_login_base(base);

        assert_eq!(p.token().await.unwrap().as_deref(), Some("token-0"));
        assert_eq!(p.token().await.unwrap().as_deref(), Some("token-1"));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn single_tenant_uses_configured_tenant() {
        let (base, forms, _) = fake_login(3600).await;
        let p = TokenProvider::new(creds(AppType::SingleTenant), reqwest::Client::new())
            .with_login_base(base);
        p.token().await.unwrap();
        assert_eq!(forms.lock().unwrap()[0].0, "tenant-1");
    }

    #[tokio::test]
    async fn token_endpoint_failure_is_auth_error() {
        let app = Router::new().route(
            "/:tenant/oauth2/v2.0/token",
            post(|| async {
                (
                    axum::http::StatusCode::BAD_REQUEST,
                    Json(json!({ "error": "invalid_client" })),
                )
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let p = TokenProvider::new(creds(AppType::MultiTenant), reqwest::Client::new())
            .with_login_base(format!("http://{addr}"));
        let err = p.token().await.unwrap_err();
        assert!(matches!(err, Error::Auth(ref m) if m.contains("invalid_client")));
    }

    #[tokio::test]
    async fn managed_identity_reads_string_expiry() {
        let app = Router::new().route(
            "/token",
            axum::routing::get(|headers: axum::http::HeaderMap| async move {
                let ok = headers.get("metadata").and_then(|v| v.to_str().ok()) == Some("true");
                Json(json!({
                    "access_token": if ok { "msi-token" } else { "missing-header" },
                    "expires_in": "86399"
                }))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let p = TokenProvider::new(creds(AppType::UserAssignedMsi), reqwest::Client::new())
            .with_imds_url(format!("http://{addr}/token"));
        assert_eq!(p.token().await.unwrap().as_deref(), Some("msi-token"));
    }

    #[test]
    fn expiry_parsing_defaults_to_an_hour() {
        let r: TokenReply = serde_json::from_value(json!({ "access_token": "t" })).unwrap();
        assert_eq!(r.expires_in_secs(), 3600);
        let r: TokenReply =
            serde_json::from_value(json!({ "access_token": "t", "expires_in": 10 })).unwrap();
        assert_eq!(r.expires_in_secs(), 10);
    }
}
