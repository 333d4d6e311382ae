use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use confsync_core::config::Config;
use confsync_core::core_config::{ConfigSync, ConfigVariant, StaticIdentity};
use confsync_core::core_crdt::{LwwConfigFactory, XChaChaCrypto};
use confsync_core::core_store::{dumps, ConfigDumpStore};
use confsync_core::logging::{init_logging_with_config, LogConfig, LogLevel};
use confsync_core::metrics::init_metrics;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "confsync")]
#[command(author, version, about = "Inspect and edit a config dump database", long_about = None)]
struct Args {
    /// Set the log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn")]
    log_level: String,

    /// Enable JSON formatted logging
    #[arg(long)]
    json_logs: bool,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Dump database (overrides the configuration file)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load an account and report what needs syncing
    Status {
        #[arg(long)]
        pubkey: String,
        /// Account secret, hex encoded (32 or 64 bytes)
        #[arg(long)]
        seed: String,
    },
    /// List stored dump rows for an account
    Dumps {
        #[arg(long)]
        pubkey: String,
    },
    /// Set one entry in a config and persist it
    Set {
        #[arg(long)]
        pubkey: String,
        #[arg(long)]
        seed: String,
        /// userProfile, contacts, convoInfoVolatile or userGroups
        #[arg(long)]
        variant: String,
        #[arg(long)]
        key: String,
        #[arg(long)]
        value: String,
    },
    /// Delete every dump row for an account
    Forget {
        #[arg(long)]
        pubkey: String,
    },
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(db) = &args.db {
        config.store.db_path = db.clone();
    }
    Ok(config)
}

fn open_store(config: &Config) -> Result<ConfigDumpStore> {
    let path = &config.store.db_path;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    Ok(ConfigDumpStore::open(path, config.store.pool_size)?)
}

fn open_sync(config: &Config, pubkey: &str) -> Result<ConfigSync> {
    let store = open_store(config)?;
    let factory = LwwConfigFactory::new(Arc::new(XChaChaCrypto))
        .with_max_message_size(config.sync.max_message_size);
    Ok(ConfigSync::new(store, Arc::new(factory), Arc::new(StaticIdentity::new(pubkey))))
}

fn load_account(config: &Config, pubkey: &str, seed: &str) -> Result<ConfigSync> {
    let secret = hex::decode(seed).context("seed must be hex")?;
    let sync = open_sync(config, pubkey)?;
    let loaded = sync.load_state(pubkey, Some(&secret))?;
    debug!(pubkey, loaded = loaded.len(), "Loaded account");
    Ok(sync)
}

fn status(config: &Config, pubkey: &str, seed: &str) -> Result<Value> {
    let sync = load_account(config, pubkey, seed)?;
    Ok(json!({
        "public_key": pubkey,
        "needs_sync": sync.needs_sync()?,
        "hashes": sync.config_hashes(pubkey)?,
        "variants": sync.status(pubkey)?,
    }))
}

fn list_dumps(config: &Config, pubkey: &str) -> Result<Value> {
    let store = open_store(config)?;
    let rows = store.read(|conn| dumps::fetch_all(conn, pubkey))?;
    Ok(Value::Array(
        rows.iter()
            .map(|dump| {
                json!({
                    "variant": dump.variant.as_str(),
                    "bytes": dump.data.len(),
                    "timestamp_ms": dump.timestamp_ms,
                })
            })
            .collect(),
    ))
}

fn set_entry(config: &Config, pubkey: &str, seed: &str, variant: &str, key: &str, value: &str) -> Result<Value> {
    let variant: ConfigVariant = variant.parse()?;
    let sync = load_account(config, pubkey, seed)?;
    let changed = sync.store().write(|tx| {
        sync.mutate_config(tx, variant, pubkey, |config| config.set(key, value.as_bytes().to_vec()))
    })?;
    let Some(changed) = changed else {
        bail!("{} is not loaded for {}", variant, pubkey);
    };
    info!(%variant, key, changed, "Updated config entry");
    Ok(json!({ "variant": variant.as_str(), "key": key, "changed": changed }))
}

fn forget(config: &Config, pubkey: &str) -> Result<Value> {
    let sync = open_sync(config, pubkey)?;
    let removed = sync.store().write(|tx| sync.remove_account(tx, pubkey))?;
    Ok(json!({ "removed": removed }))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level: LogLevel = args.log_level.parse().unwrap_or_else(|err| {
        eprintln!("{}, using 'warn'", err);
        LogLevel::Warn
    });
    init_logging_with_config(LogConfig::new(log_level).json_format(args.json_logs))?;
    init_metrics();

    let config = load_config(&args)?;
    debug!(db = %config.store.db_path.display(), "Using dump database");

    let output = match &args.command {
        Command::Status { pubkey, seed } => status(&config, pubkey, seed)?,
        Command::Dumps { pubkey } => list_dumps(&config, pubkey)?,
        Command::Set { pubkey, seed, variant, key, value } => {
            set_entry(&config, pubkey, seed, variant, key, value)?
        }
        Command::Forget { pubkey } => forget(&config, pubkey)?,
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
