//! CLI argument definitions using clap
//!
//! This module contains the clap structs for parsing CLI arguments.
//! The actual command implementations are in the `commands` module.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Kwacha Tracker - mobile-money insights backend
#[derive(Parser, Debug)]
#[command(name = "kwacha")]
#[command(about = "Kwacha Tracker backend: API server and daily insight sweep", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Database path (overrides DATABASE_PATH and the config file)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// TOML configuration file (overrides KWACHA_CONFIG)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable database encryption (not recommended for production)
    ///
    /// By default, the database is encrypted using SQLCipher.
    /// Set KWACHA_DB_KEY with your passphrase.
    /// Use --no-encrypt only for development or testing.
    #[arg(long, global = true)]
    pub no_encrypt: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the database and run migrations
    Init,

    /// Start the API server and the daily insight scheduler
    Serve {
        /// Port to listen on (overrides PORT)
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to (overrides HOST)
        #[arg(long)]
        host: Option<String>,

        /// Do not start the daily scheduler
        #[arg(long)]
        no_scheduler: bool,
    },

    /// Run the insight sweep once, now
    Sweep {
        /// Pause between users in milliseconds (overrides SCHEDULER_USER_DELAY_MS)
        #[arg(long)]
        delay_ms: Option<u64>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show usage statistics
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}
