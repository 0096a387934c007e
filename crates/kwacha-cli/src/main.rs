//! Kwacha CLI
//!
//! Usage:
//!   kwacha init               Create the database
//!   kwacha serve --port 8080  Start the API server and scheduler
//!   kwacha sweep              Generate and push insights for all users now
//!   kwacha stats              Show usage statistics

mod cli;
mod commands;


use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use kwacha_core::Config;

use cli::*;

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine; the environment may be set directly
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up logging
    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(db) = &cli.db {
        config.database.path = db.to_string_lossy().to_string();
    }

    match cli.command {
        Commands::Init => commands::cmd_init(&config.database, cli.no_encrypt),
        Commands::Serve {
            port,
            host,
            no_scheduler,
        } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(host) = host {
                config.server.host = host;
            }
            if no_scheduler {
                config.scheduler.enabled = false;
            }
            commands::cmd_serve(config, cli.no_encrypt).await
        }
        Commands::Sweep { delay_ms, json } => {
            if let Some(delay) = delay_ms {
                config.scheduler.user_delay_ms = delay;
            }
            let db = commands::open_db(&config.database, cli.no_encrypt)?;
            commands::cmd_sweep(&db, &config, json).await.map(|_| ())
        }
        Commands::Stats { json } => {
            let db = commands::open_db(&config.database, cli.no_encrypt)?;
            commands::cmd_stats(&db, json)
        }
    }
}
