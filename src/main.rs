//! Mesh Config Sync
//!
//! Operator tool over the sync database: hash a configuration document or
//! inspect the persisted state of a device.
//!
//! # Commands
//!
//! - `hash` - Print leaf hashes and root hash of a document
//! - `status` - Print sync status of a device
//! - `pending` - List pending changes of a device
//! - `conflicts` - List conflicted changes of a device

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use meshconfig_sync::config::Config;
use meshconfig_sync::db;
use meshconfig_sync::leaf::{compute_leaf_hashes, compute_root_hash, ConfigDocument};
use meshconfig_sync::ConfigSyncEngine;

/// Mesh radio configuration sync tools.
#[derive(Parser)]
#[command(name = "meshconfig-sync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print leaf hashes and root hash of a configuration document
    Hash {
        /// JSON document with `config`, `moduleConfig`, `channels` and `user`
        document: PathBuf,
    },

    /// Print sync status of a device
    Status {
        /// Device identifier
        device_id: String,
    },

    /// List pending changes of a device, oldest first
    Pending {
        /// Device identifier
        device_id: String,
    },

    /// List conflicted changes of a device
    Conflicts {
        /// Device identifier
        device_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    dotenvy::dotenv().ok();

    let config = Config::from_env().context("Failed to load config from env")?;

    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_new(&config.log_filter)
            .unwrap_or_else(|_| "meshconfig_sync=debug".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Hash { document } => hash_document(&document),
        Commands::Status { device_id } => {
            let engine = open_engine(&config).await?;
            print_json(&engine.status(&device_id).await?)
        }
        Commands::Pending { device_id } => {
            let engine = open_engine(&config).await?;
            print_json(&engine.pending_changes(&device_id).await?)
        }
        Commands::Conflicts { device_id } => {
            let engine = open_engine(&config).await?;
            print_json(&engine.conflicts(&device_id).await?)
        }
    }
}

async fn open_engine(config: &Config) -> anyhow::Result<ConfigSyncEngine> {
    tracing::info!("Database: {}", config.database.url);

    let pool = db::create_pool(&config.database)
        .await
        .context("Failed to initialize database")?;

    Ok(ConfigSyncEngine::with_sqlite(pool))
}

fn hash_document(path: &Path) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let doc: ConfigDocument = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid config document: {}", path.display()))?;

    let leaves = compute_leaf_hashes(&doc);
    let root = compute_root_hash(&leaves);
    tracing::debug!(path = %path.display(), root = %root, "Hashed document");

    print_json(&json!({ "root": root, "leaves": leaves }))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
