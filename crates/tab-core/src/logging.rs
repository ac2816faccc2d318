use tracing_subscriber::{fmt, EnvFilter};

use crate::{errors::Error, Result};

/// Initialize logging/tracing for the bot.
///
/// `LOG_FORMAT=json` switches to JSON lines, `NO_COLOR` disables ANSI colors.
/// Output is written line by line to stdout so container logs never lag.
pub fn init(service_name: &str) -> Result<()> {
    // Default: info for our crates, warn for everything else.
    // Can be overridden with `RUST_LOG`.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,tab=info,tab_core=info,tab_openai=info,tab_teams=info,tab_server=info,tower_http=info,{}=info",
            service_name.replace('-', "_")
        ))
    });

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.trim().eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let ansi = std::env::var_os("NO_COLOR").is_none();

    let builder = fmt().with_env_filter(filter).with_target(false);
    let res = if json {
        builder.json().try_init()
    } else {
        builder.with_ansi(ansi).try_init()
    };

    res.map_err(|e| Error::Config(format!("failed to init logging: {e}")))
}
