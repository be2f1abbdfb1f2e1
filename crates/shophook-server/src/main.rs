mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use shophook_server::ServerConfig;
use shophook_server::config::database_url_from_env;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "shophook_server=debug,shophook_core=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or_default() {
        Commands::Run => commands::serve::run(ServerConfig::from_env()?).await,
        Commands::Drain => commands::jobs::drain(ServerConfig::from_env()?).await,
        Commands::Failed { limit } => commands::jobs::failed(&database_url_from_env(), limit).await,
        Commands::Retry { job_id } => commands::jobs::retry(&database_url_from_env(), &job_id).await,
    }
}
