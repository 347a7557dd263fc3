//! # memohub server (`memohub`)
//!
//! Starts the HTTP API. Maintenance (backups, optimisation) runs inside the
//! server process and is driven over HTTP; there are no other commands.
//!
//! ## Usage
//!
//! ```bash
//! memohub --config ./config/memohub.toml serve
//! memohub                      # same as `serve` with the default config path
//! ```
//!
//! Logging is controlled by `RUST_LOG` (default `memohub=info,tower_http=info`).
//! A `.env` file in the working directory is loaded before the config.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use memohub::config;
use memohub::context::AppContext;
use memohub::server;

/// memohub: a self-hosted notes backend with semantic search.
#[derive(Parser)]
#[command(name = "memohub", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// A missing file is allowed; every setting then comes from its default
    /// or from the environment.
    #[arg(long, global = true, default_value = "./config/memohub.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run migrations, start background jobs, and serve the HTTP API.
    Serve,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("memohub=info,tower_http=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is normal.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let ctx = AppContext::init(cfg).await?;
            server::run_server(ctx).await?;
        }
    }

    Ok(())
}
