use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use feedsync::config::Config;
use feedsync::storage::{Database, DatabaseError, EntryStatus, StoreOptions};

#[derive(Parser, Debug)]
#[command(name = "feedsync", about = "Maintenance tool for the feedsync entry store")]
struct Args {
    /// Path to the TOML config file
    #[arg(long, value_name = "FILE", default_value = "feedsync.toml")]
    config: PathBuf,

    /// Database path (overrides `database_path` from the config file)
    #[arg(long, value_name = "FILE")]
    database: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Archive old read and unread entries using the [cleanup] settings
    Cleanup,
    /// Move a user's read entries to removed, keeping starred and shared ones
    FlushHistory {
        #[arg(long, value_name = "ID")]
        user: i64,
    },
    /// Print entry counts per status
    Stats,
    /// Check that the database answers
    Ping,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let mut config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;
    if let Some(path) = args.database {
        config.database_path = path;
    }

    let db = match Database::open_with(&config.database_path, &StoreOptions::from(&config)).await {
        Ok(db) => db,
        Err(DatabaseError::Locked(_)) => {
            eprintln!(
                "Error: the database at {} is locked by another process. Please retry.",
                config.database_path
            );
            std::process::exit(1);
        }
        Err(e) => {
            return Err(anyhow::anyhow!("Failed to open database: {}", e));
        }
    };

    match args.command {
        Command::Cleanup => run_cleanup(&db, &config).await?,
        Command::FlushHistory { user } => {
            let flushed = db
                .flush_history(user)
                .await
                .with_context(|| format!("Failed to flush history of user #{}", user))?;
            println!("Flushed {} read entries", flushed);
        }
        Command::Stats => {
            let counts = db.count_all_entries().await.context("Failed to count entries")?;
            println!("unread:  {}", counts.unread);
            println!("read:    {}", counts.read);
            println!("removed: {}", counts.removed);
            println!("total:   {}", counts.total);
        }
        Command::Ping => {
            db.ping().await.context("Database did not answer")?;
            let version = db.database_version().await.context("Failed to read version")?;
            println!("ok (SQLite {})", version);
        }
    }

    db.close().await;
    Ok(())
}

async fn run_cleanup(db: &Database, config: &Config) -> Result<()> {
    let cleanup = &config.cleanup;

    let read = db
        .archive_entries(
            EntryStatus::Read,
            cleanup.archive_read_days,
            cleanup.archive_batch_size,
        )
        .await
        .context("Failed to archive read entries")?;

    let unread = db
        .archive_entries(
            EntryStatus::Unread,
            cleanup.archive_unread_days,
            cleanup.archive_batch_size,
        )
        .await
        .context("Failed to archive unread entries")?;

    tracing::info!(read, unread, "Archived entries");
    println!("Archived {} read and {} unread entries", read, unread);
    Ok(())
}
