use std::{
    env, fs,
    net::{IpAddr, SocketAddr, ToSocketAddrs},
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, health::ProbePolicy, Result};

pub const DEFAULT_PORT: u16 = 3978;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Typed configuration for the bot service.
///
/// Everything comes from the process environment; nothing is baked into the image.
#[derive(Clone, Debug)]
pub struct Config {
    // Listener
    pub host: String,
    pub port: u16,

    // Behavior flags
    pub development_mode: bool,
    pub teams_reply_enabled: bool,

    // Bot Framework credentials
    pub bot_id: String,
    pub bot_password: String,
    pub bot_type: String,
    pub bot_tenant_id: String,

    // OpenAI
    pub openai_api_key: String,
    pub openai_model_name: String,
    pub openai_base_url: String,
    pub openai_timeout: Duration,

    // Prompts (read-only mount)
    pub prompts_dir: PathBuf,
    pub default_prompt: String,

    // Conversation state
    pub history_max_turns: usize,
    /// Conversations idle longer than this are dropped from memory.
    pub conversation_idle_ttl: Duration,

    // Deployment
    pub public_domain: Option<String>,
    pub probe: ProbePolicy,
}

impl Config {
    /// Load configuration from `.env` (if present) and the process environment.
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    pub fn from_vars(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let openai_api_key = get("OPENAI_API_KEY").and_then(non_empty).ok_or_else(|| {
            Error::Config("OPENAI_API_KEY environment variable is required".to_string())
        })?;

        let host = get("HOST")
            .and_then(non_empty)
            .unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = parse_port(get("PORT"))?;

        let development_mode = parse_bool(get("DEVELOPMENT_MODE")).unwrap_or(true);
        let teams_reply_enabled = parse_bool(get("TEAMS_REPLY_ENABLED")).unwrap_or(false);

        let bot_id = get("BOT_ID").unwrap_or_default().trim().to_string();
        let bot_password = get("BOT_PASSWORD").unwrap_or_default();
        let bot_type = get("BOT_TYPE").unwrap_or_default().trim().to_string();
        let bot_tenant_id = get("BOT_TENANT_ID").unwrap_or_default().trim().to_string();

        let openai_model_name = get("OPENAI_MODEL_NAME")
            .and_then(non_empty)
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let openai_base_url = get("OPENAI_BASE_URL")
            .and_then(non_empty)
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string());
        let openai_timeout =
            Duration::from_millis(parse_u64(get("OPENAI_TIMEOUT_MS")).unwrap_or(30_000));

        let prompts_dir = get("PROMPTS_DIR")
            .and_then(non_empty)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("prompts"));
        let default_prompt = get("DEFAULT_PROMPT")
            .and_then(non_empty)
            .unwrap_or_else(|| "chat".to_string());

        let history_max_turns = parse_u64(get("HISTORY_MAX_TURNS")).unwrap_or(10) as usize;
        let conversation_idle_ttl =
            Duration::from_secs(parse_u64(get("CONVERSATION_IDLE_TTL_SECS")).unwrap_or(86_400));

        let public_domain = get("RAILWAY_PUBLIC_DOMAIN").and_then(non_empty);
        let probe = ProbePolicy::from_vars(&get);

        Ok(Self {
            host,
            port,
            development_mode,
            teams_reply_enabled,
            bot_id,
            bot_password,
            bot_type,
            bot_tenant_id,
            openai_api_key,
            openai_model_name,
            openai_base_url,
            openai_timeout,
            prompts_dir,
            default_prompt,
            history_max_turns,
            conversation_idle_ttl,
            public_domain,
            probe,
        })
    }

    /// Bind address for `HOST`/`PORT`. IPv4, IPv6 (`::`, `[::1]`) and hostnames are accepted.
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        let host = self.host.trim();
        let bare = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if let Ok(ip) = bare.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, self.port));
        }

        (bare, self.port)
            .to_socket_addrs()
            .map_err(|e| Error::Config(format!("cannot resolve HOST {host:?}: {e}")))?
            .next()
            .ok_or_else(|| Error::Config(format!("HOST {host:?} resolved to no addresses")))
    }

    /// `production` when a public domain is known, `development` otherwise.
    pub fn environment(&self) -> &'static str {
        if self.public_domain.is_some() {
            "production"
        } else {
            "development"
        }
    }

    pub fn public_url(&self, port: u16) -> String {
        match &self.public_domain {
            Some(domain) => format!("https://{domain}"),
            None => format!("http://localhost:{port}"),
        }
    }
}

/// Read only the variables the out-of-process health probe needs.
///
/// The probe runs inside the same image but must work without credentials.
pub fn probe_target_from_env() -> Result<String> {
    load_dotenv_if_present(Path::new(".env"));
    let port = parse_port(env::var("PORT").ok())?;
    Ok(format!("http://127.0.0.1:{port}/health"))
}

fn parse_port(v: Option<String>) -> Result<u16> {
    let Some(raw) = v.and_then(non_empty) else {
        return Ok(DEFAULT_PORT);
    };
    match raw.trim().parse::<u16>() {
        Ok(0) | Err(_) => Err(Error::Config(format!("PORT must be 1-65535, got {raw:?}"))),
        Ok(p) => Ok(p),
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        out.push((key.to_string(), val));
    }
    out
}

pub(crate) fn parse_bool(v: Option<String>) -> Option<bool> {
    v.map(|s| {
        matches!(
            s.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

pub(crate) fn parse_u64(v: Option<String>) -> Option<u64> {
    v.and_then(|s| s.trim().parse::<u64>().ok())
}

pub(crate) fn parse_u32(v: Option<String>) -> Option<u32> {
    v.and_then(|s| s.trim().parse::<u32>().ok())
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
