//! mimir: administrative CLI
//!
//! Inspects and edits the persisted cache snapshot and credential pool.
//! Run it while no guard process is writing the same files.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use mimir::cache::CachePersistence;
use mimir::config::{Config, Secrets};
use mimir::{CredentialPool, FileBlobStore, MimirError, ResponseCache};

/// Mimir cache and credential administration
#[derive(Parser)]
#[command(name = "mimir")]
#[command(version = mimir::PKG_VERSION)]
#[command(about = "Mimir response cache and credential pool administration")]
struct Args {
    /// Config file (default: ~/.mimir/config.toml, then /etc/mimir/config.toml)
    #[arg(short, long, env = "MIMIR_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Response cache operations
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },

    /// Credential pool operations
    Keys {
        #[command(subcommand)]
        command: KeysCommand,
    },
}

#[derive(Subcommand)]
enum CacheCommand {
    /// Show snapshot statistics
    Stats,
    /// Drop every cached entry
    Clear,
}

#[derive(Subcommand)]
enum KeysCommand {
    /// List credentials for a service (masked)
    List {
        /// Service name, e.g. "groq"
        service: String,
    },
    /// Add a credential
    Add {
        service: String,
        /// Label used to refer to the key later
        label: String,
        /// Secret value (omit to use <SERVICE>_API_KEY or secrets.toml)
        #[arg(long)]
        secret: Option<String>,
    },
    /// Remove the credential with a label
    Remove { service: String, label: String },
    /// Re-enable the credential with a label
    Enable { service: String, label: String },
    /// Disable the credential with a label
    Disable { service: String, label: String },
    /// Reset usage counters for a service
    Reset { service: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise tracing (default: warn for CLI; override with RUST_LOG).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    let config = Config::load(args.config.as_deref())?;

    match args.command {
        Command::Cache { command } => run_cache(&config, command).await?,
        Command::Keys { command } => run_keys(&config, command).await?,
    }
    Ok(())
}

async fn run_cache(config: &Config, command: CacheCommand) -> mimir::Result<()> {
    let path = config.cache.resolved_path();
    let cache = Arc::new(ResponseCache::new(config.cache.cache_config()));
    let persistence = CachePersistence::new(
        Arc::clone(&cache),
        Arc::new(FileBlobStore::new(&path)),
    );
    let report = persistence.reload().await?;

    match command {
        CacheCommand::Stats => {
            let stats = cache.stats();
            println!("snapshot: {}", path.display());
            println!("entries: {} (dropped {} expired)", stats.size, report.expired);
            println!("hits: {}", stats.hits);
            println!("misses: {}", stats.misses);
            println!("added: {}", stats.added);
            println!("expired: {}", stats.expired);
            println!("evicted: {}", stats.evicted);
        }
        CacheCommand::Clear => {
            let removed = cache.len();
            cache.clear();
            persistence.snapshot().await?;
            println!("cleared {removed} entries");
        }
    }
    Ok(())
}

async fn run_keys(config: &Config, command: KeysCommand) -> mimir::Result<()> {
    let store = Arc::new(FileBlobStore::private(config.credentials.resolved_path()));
    let pool = CredentialPool::new(store).policy(config.credentials.policy);
    pool.reload().await?;
    for (name, section) in &config.services {
        pool.configure(name, section.pool_config()).await;
    }

    match command {
        KeysCommand::List { service } => {
            let stats = pool.stats(&service).await?;
            println!(
                "{}: {} keys ({} enabled), {} requests per key every {}s",
                stats.service,
                stats.total_keys,
                stats.enabled_keys,
                stats.requests_per_credential,
                stats.rotation_period_secs
            );
            for key in stats.per_key {
                let state = if key.enabled { "enabled" } else { "disabled" };
                println!(
                    "  {:<16} {}  used {:>5}  remaining {:>5}  {state}",
                    key.label, key.masked, key.usage_count, key.remaining
                );
            }
        }
        KeysCommand::Add {
            service,
            label,
            secret,
        } => {
            let secret = match secret {
                Some(secret) => secret,
                None => Secrets::load()?.api_key(&service).ok_or_else(|| {
                    MimirError::InvalidInput(format!(
                        "no secret given and {} not set",
                        mimir::config::env_var_for(&service)
                    ))
                })?,
            };
            if pool.add_credential(&service, &secret, &label).await {
                println!("added {label} ({})", mimir::credentials::mask(&secret));
            } else {
                println!("{service} already holds that key");
            }
        }
        KeysCommand::Remove { service, label } => {
            let secret = lookup(&pool, &service, &label).await?;
            pool.remove_credential(&service, &secret).await;
            println!("removed {label}");
        }
        KeysCommand::Enable { service, label } => {
            let secret = lookup(&pool, &service, &label).await?;
            pool.set_enabled(&service, &secret, true).await;
            println!("enabled {label}");
        }
        KeysCommand::Disable { service, label } => {
            let secret = lookup(&pool, &service, &label).await?;
            pool.set_enabled(&service, &secret, false).await;
            println!("disabled {label}");
        }
        KeysCommand::Reset { service } => {
            let count = pool.reset_usage(&service).await;
            println!("reset {count} keys for {service}");
        }
    }
    Ok(())
}

async fn lookup(pool: &CredentialPool, service: &str, label: &str) -> mimir::Result<String> {
    pool.secret_for_label(service, label)
        .await
        .ok_or_else(|| MimirError::NotFound(format!("no key labelled '{label}' for {service}")))
}
