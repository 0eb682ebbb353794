// Peloton entry point.
//
// Startup sequence:
// 1. Load config
// 2. Initialize tracing (log to file, stdout is for command output)
// 3. Open database
// 4. Build the remote sync client
// 5. Dispatch the subcommand

mod cli;
mod commands;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use peloton_core::config;
use peloton_core::db::Database;
use peloton_core::remote::RemoteClient;

use crate::cli::Cli;
use crate::commands::AppContext;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 1. Load config
    let config = config::load_config().context("failed to load configuration")?;

    // 2. Initialize tracing
    init_tracing(&config.log_dir)?;
    info!(
        "Config loaded: season {}, {} riders per team, {:.1}M budget",
        config.season.year, config.season.team.team_size, config.season.team.initial_budget
    );

    // 3. Open database
    if let Some(parent) = config.db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    let db = Database::open(&config.db_path.to_string_lossy()).context("failed to open database")?;
    info!("Database opened at {}", config.db_path.display());

    // 4. Build the remote sync client
    let remote = RemoteClient::from_config(&config).context("failed to build remote client")?;
    if remote.is_active() {
        info!("Remote sync active ({})", config.remote.base_url);
    } else {
        info!("Remote sync disabled");
    }

    let ctx = AppContext {
        config,
        db: Arc::new(db),
        remote: Arc::new(remote),
    };

    // 5. Dispatch
    if let Err(e) = commands::dispatch(cli, &ctx).await {
        error!("Command failed: {:#}", e);
        return Err(e);
    }
    Ok(())
}

/// Initialize tracing to log to a file under `log_dir`.
fn init_tracing(log_dir: &Path) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create log directory {}", log_dir.display()))?;

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("peloton.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("peloton=info,warn")),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
