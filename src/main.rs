use anyhow::Result;
use clap::Parser;

use chatops_relay::config::Config;
use chatops_relay::logs::init_logging;
use chatops_relay::server::{ServerConfig, start_server};

/// ChatOps deployment relay: Slack slash commands in, GitHub Actions
/// dispatches out, completion callbacks back.
#[derive(Parser)]
#[command(name = "chatops-relay", version, about)]
struct Cli {
    /// Port to listen on
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Path to the SQLite database file
    #[arg(long, default_value = "chatops.db")]
    db_path: std::path::PathBuf,

    /// Bind to localhost only and allow cross-origin requests
    #[arg(long)]
    dev: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_logging()?;

    let cli = Cli::parse();
    let config = Config::from_env()?;

    start_server(
        ServerConfig {
            port: cli.port,
            db_path: cli.db_path,
            dev_mode: cli.dev,
        },
        config,
    )
    .await
}
