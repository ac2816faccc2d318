use std::{sync::Arc, time::Duration};

use anyhow::Context;
use tokio::{net::TcpListener, task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use tab_core::{
    bot::{BotApplication, BotOptions},
    config::Config,
    connector::ConnectorPort,
    conversation::MemoryStorage,
    model::ChatModel,
    planner::ActionPlanner,
    prompts::PromptManager,
};
use tab_openai::{OpenAiClient, OpenAiConfig};
use tab_server::AppState;
use tab_teams::{BotCredentials, ConnectorClient, InboundAuth, TokenProvider};

use crate::signals;

const CONNECTOR_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn run() -> anyhow::Result<()> {
    let cfg = Arc::new(Config::load()?);
    tab_core::logging::init("tab")?;

    let model = Arc::new(OpenAiClient::new(OpenAiConfig::from_core(&cfg))?);

    let http = reqwest::Client::builder()
        .timeout(CONNECTOR_TIMEOUT)
        .build()
        .context("building http client")?;
    let creds = BotCredentials::from_config(&cfg)?;
    if creds.is_anonymous() {
        tracing::warn!("BOT_ID is empty; connector calls are sent without a token");
    }
    let tokens = Arc::new(TokenProvider::new(creds, http.clone()));
    let connector = Arc::new(ConnectorClient::new(http, tokens));

    let (listener, port) = bind(&cfg).await?;
    let state = build_state(cfg.clone(), model, connector, port)?;

    let public_url = cfg.public_url(port);
    tracing::info!(port, environment = cfg.environment(), "Teams AI bot listening");
    tracing::info!("public url: {public_url}");
    tracing::info!("teams webhook: {public_url}/api/messages");
    tracing::info!("test endpoint: {public_url}/api/test");
    tracing::info!("api docs: {public_url}{}", tab_server::docs::DOCS_PATH);

    let shutdown = CancellationToken::new();
    signals::cancel_on_signal(shutdown.clone());
    if !cfg.conversation_idle_ttl.is_zero() {
        let _janitor =
            spawn_janitor(state.bot.clone(), cfg.conversation_idle_ttl, shutdown.clone());
    }
    tab_server::serve(listener, state, shutdown).await
}

/// Bind `HOST`/`PORT`. Returns the listener and the port the socket reports.
pub(crate) async fn bind(cfg: &Config) -> anyhow::Result<(TcpListener, u16)> {
    let addr = cfg.listen_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    let port = listener.local_addr()?.port();
    tracing::debug!(%addr, port, "listener bound");
    Ok((listener, port))
}

/// Wire the bot and handler state. Fails when the default prompt cannot be loaded.
pub(crate) fn build_state(
    cfg: Arc<Config>,
    model: Arc<dyn ChatModel>,
    connector: Arc<dyn ConnectorPort>,
    port: u16,
) -> anyhow::Result<Arc<AppState>> {
    let prompts = Arc::new(PromptManager::new(cfg.prompts_dir.clone()));
    let template = prompts.get(&cfg.default_prompt).with_context(|| {
        format!(
            "default prompt {:?} is not loadable from {}",
            cfg.default_prompt,
            cfg.prompts_dir.display()
        )
    })?;
    tracing::info!(
        prompt = %template.name,
        dir = %cfg.prompts_dir.display(),
        model = %cfg.openai_model_name,
        "prompt loaded"
    );
    let planner = ActionPlanner::new(model, prompts, cfg.default_prompt.clone());

    let bot = BotApplication::new(
        planner,
        MemoryStorage::new(cfg.history_max_turns),
        connector,
        BotOptions {
            reply_enabled: cfg.teams_reply_enabled,
            feedback_loop_enabled: true,
        },
    );
    if !cfg.teams_reply_enabled {
        tracing::warn!("TEAMS_REPLY_ENABLED is off; replies are logged, not sent");
    }

    let auth = InboundAuth::new(cfg.bot_id.clone(), cfg.development_mode);
    if !auth.is_enforced() {
        tracing::warn!("inbound authentication is disabled (development mode or empty BOT_ID)");
    }

    Ok(Arc::new(AppState::new(cfg, Arc::new(bot), auth, port)))
}

/// How often idle conversations are swept: a quarter of the TTL, between 1s and 1h.
fn sweep_period(ttl: Duration) -> Duration {
    (ttl / 4).clamp(Duration::from_secs(1), Duration::from_secs(3600))
}

/// Periodically drop idle conversations until `shutdown` is cancelled.
fn spawn_janitor(
    bot: Arc<BotApplication>,
    ttl: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(sweep_period(ttl));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tick.tick() => {
                    bot.evict_idle(ttl).await;
                }
            }
        }
        tracing::debug!("conversation janitor stopped");
    })
}
