use clap::{Parser, Subcommand};

mod healthcheck;
mod serve;
mod signals;
mod supervise;

#[derive(Parser, Debug)]
#[command(name = "tab", version, about = "Microsoft Teams AI bot")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Run the bot HTTP server (default)
    Serve,
    /// Probe the local /health endpoint once; exits 0 when healthy
    Healthcheck {
        /// Probe this URL instead of http://127.0.0.1:$PORT/health
        #[arg(long)]
        url: Option<String>,
    },
    /// Run `tab serve` as a child process and restart it when it turns unhealthy
    Supervise {
        /// no | on-failure | unless-stopped
        #[arg(long, default_value = "unless-stopped")]
        restart: String,
        #[arg(long)]
        url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve::run().await,
        Command::Healthcheck { url } => {
            if !healthcheck::run(url).await? {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Supervise { restart, url } => supervise::run(&restart, url).await,
    }
}
