//! Sekai Master CLI - inspect and drive the master data cache.
//!
//! Reads come from a local directory of master database dumps; the cache
//! lives under the user cache directory unless `--cache-dir` is given.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use sekai_master::{DumpDirSource, EntityKind, MasterCacheConfig, MasterData};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "sekai-master")]
#[command(about = "Persistent cache for game master data")]
struct Args {
    /// Directory holding the master data dump (cards.json, musics.json, ...)
    #[arg(short, long)]
    source: PathBuf,

    /// Cache directory (defaults to the user cache directory)
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// JSON config file; missing files fall back to defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging (ignored when RUST_LOG is set)
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print one record
    Get { kind: EntityKind, id: u64 },
    /// Print every record of a kind, one JSON document per line
    List { kind: EntityKind },
    /// Sync kinds now, regardless of staleness (all kinds when none given)
    Sync { kinds: Vec<EntityKind> },
    /// Show the cache state of every kind
    Status,
    /// Keep all kinds fresh in the background until Ctrl-C
    Watch,
}

fn default_cache_dir() -> Result<PathBuf> {
    let base = dirs::cache_dir().context("No user cache directory on this platform")?;
    Ok(base.join("sekai-master"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.debug {
        "sekai_master=debug,info"
    } else {
        "info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    if !args.source.is_dir() {
        bail!("Dump directory does not exist: {}", args.source.display());
    }

    let cache_dir = match args.cache_dir {
        Some(path) => path,
        None => default_cache_dir()?,
    };
    let config = match &args.config {
        Some(path) => MasterCacheConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => MasterCacheConfig::default(),
    };

    let master = MasterData::builder(&cache_dir)
        .source(DumpDirSource::new(&args.source))
        .config(config)
        .build()
        .with_context(|| format!("Failed to open cache at {}", cache_dir.display()))?;

    match args.command {
        Command::Get { kind, id } => {
            let record = master.get(kind, id).await?;
            println!("{}", serde_json::to_string_pretty(record.value())?);
        }
        Command::List { kind } => {
            let mut records = master.iterate(kind).await?.into_stream();
            while let Some(record) = records.next().await {
                println!("{}", serde_json::to_string(record?.value())?);
            }
        }
        Command::Sync { kinds } => {
            let kinds = if kinds.is_empty() {
                master.kinds().to_vec()
            } else {
                kinds
            };
            for kind in kinds {
                let count = master.refresh(kind).await?;
                info!("Synced {} {} records", count, kind);
            }
        }
        Command::Status => {
            let statuses = master.status_all().await;
            println!("{}", serde_json::to_string_pretty(&statuses)?);
        }
        Command::Watch => {
            let background = master.spawn_background();
            info!("Watching {} kinds, press Ctrl-C to stop", master.kinds().len());

            tokio::signal::ctrl_c().await?;
            info!("Shutdown signal received, stopping");
            background.shutdown().await;
        }
    }

    Ok(())
}
