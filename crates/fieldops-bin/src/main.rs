//! Field-ops outbox - durable delivery of worker actions recorded offline.

mod app;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use fieldops_config_and_utils::{init_logging, Config, Paths};

/// Field-ops outbox command-line interface.
#[derive(Parser)]
#[command(name = "fieldops-outbox")]
#[command(about = "Durable outbox for field worker actions")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error). Defaults to the config file value
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for the ledger, config, and logs. Defaults to ~/.fieldops
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    /// Bearer token for the sync endpoint
    #[arg(long, env = "FIELDOPS_AUTH_TOKEN", global = true, hide_env_values = true)]
    auth_token: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Recover the outbox and keep flushing until Ctrl-C
    Run,
    /// Run a single flush pass
    Flush,
    /// Print the queue status as JSON
    Status,
    /// Return dead-lettered events to the pending queue
    RetryAll,
    /// Delete every outbox event (irreversible)
    Clear {
        /// Required confirmation
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    let config = Config::load(&paths)?;

    let level = cli.log_level.as_deref().unwrap_or(&config.log_level);
    init_logging(level);

    let outbox = app::OutboxApp::open(config, paths, cli.auth_token.as_deref()).await?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => app::run(outbox).await?,
        Commands::Flush => app::flush_once(&outbox).await?,
        Commands::Status => app::print_status(&outbox).await?,
        Commands::RetryAll => app::retry_all(&outbox).await?,
        Commands::Clear { yes } => app::clear(&outbox, yes).await?,
    }

    Ok(())
}
