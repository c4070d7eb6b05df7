//! imgup CLI
//!
//! Maintenance and inspection tool for the imgup record store: runs the
//! expiry sweep and lists, searches, shows or uploads records directly
//! against the database file.

mod commands;
mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt};

use imgup_store::StoreError;

use crate::config::CliConfig;

/// imgup CLI: manage the imgup record store.
#[derive(Parser, Debug)]
#[command(name = "imgup", version, about)]
struct Cli {
    /// Path to the database file.
    #[arg(short = 'd', long, env = "IMGUPD_DATABASE_PATH", global = true)]
    database: Option<PathBuf>,

    /// TOML configuration file.
    #[arg(long, env = "IMGUP_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Output format.
    #[arg(long, default_value = "text", global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Delete every expired record.
    Clean,
    /// List visible records, newest first.
    Recents(commands::list::RecentsArgs),
    /// Search visible records by title and author.
    Search(commands::list::SearchArgs),
    /// Show one record, hidden or not.
    Show(commands::show::ShowArgs),
    /// Store a file as a new record.
    Upload(commands::upload::UploadArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match cli.config {
        Some(ref path) => CliConfig::load(path)?,
        None => CliConfig::default(),
    };
    let path = config.database_path(cli.database.as_deref());
    debug!(path = %path.display(), "resolved database path");
    let store = imgup_store_sqlite::open_with(config.sqlite_config(path)).await?;

    let result = match cli.command {
        Command::Clean => commands::clean::run(&store, &cli.format).await,
        Command::Recents(args) => commands::list::recents(&store, &args, &cli.format).await,
        Command::Search(args) => commands::list::search(&store, &args, &cli.format).await,
        Command::Show(args) => commands::show::run(&store, &args, &cli.format).await,
        Command::Upload(args) => commands::upload::run(&store, &args, &cli.format).await,
    };

    store.close().await;
    if let Err(e) = &result {
        if let Some(hint) = retry_hint(e) {
            eprintln!("hint: {hint}");
        }
    }
    result
}

/// Suggest retrying when the failure is transient.
fn retry_hint(err: &anyhow::Error) -> Option<&'static str> {
    match err.downcast_ref::<StoreError>() {
        Some(e) if e.is_retryable() => {
            Some("the store was busy; running the command again may succeed")
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn retry_hint_only_for_transient_errors() {
        let busy = anyhow::Error::from(StoreError::LockTimeout(Duration::from_secs(30)));
        assert!(retry_hint(&busy).is_some());

        let exhausted = anyhow::Error::from(StoreError::AllocationExhausted { attempts: 30 });
        assert!(retry_hint(&exhausted).is_some());

        let invalid = anyhow::Error::from(StoreError::ConstraintViolation("empty".into()));
        assert!(retry_hint(&invalid).is_none());

        let io = anyhow::anyhow!("failed to read upload");
        assert!(retry_hint(&io).is_none());
    }
}
