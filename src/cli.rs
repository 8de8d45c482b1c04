//! Command-line interface for the `tiercache` binary
//!
//! Operates on a durable store from the shell: each invocation builds a fresh
//! cache (empty fast tier) over the configured store, runs one subcommand and
//! exits. Every option can also come from a `TIERCACHE_*` environment variable.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use thiserror::Error;

use crate::cache::{Cache, CacheConfig, SetOptions};
use crate::error::{FetchError, StorageError};
use crate::fetch::{CachedFetcher, FetchOptions};
use crate::store::{FileStore, StoreKind};
use crate::telemetry::LogFormat;

/// Error types for CLI argument handling and command execution
#[derive(Debug, Error)]
pub enum CliError {
    /// No `--path` given and no platform cache directory exists
    #[error("No cache directory available; pass --path")]
    NoCacheDir,

    /// A value argument was not valid JSON
    #[error("Invalid JSON value '{input}': {reason}")]
    InvalidJson {
        /// The rejected argument
        input: String,
        /// Parser message
        reason: String,
    },

    /// The store could not be opened
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A fetch failed
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// Durable backend selectable from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreArg {
    /// One JSON file per entry
    Flat,
    /// SQLite database
    Sqlite,
}

/// tiercache - inspect and maintain a tiered cache's durable store
#[derive(Parser, Debug)]
#[command(name = "tiercache")]
#[command(about = "Inspect and maintain a tiercache durable store")]
#[command(version)]
pub struct Cli {
    /// Durable backend to open
    #[arg(long, value_enum, env = "TIERCACHE_STORE", default_value_t = StoreArg::Flat)]
    pub store: StoreArg,

    /// Cache directory (flat) or database file (sqlite); defaults to the XDG cache dir
    #[arg(long, env = "TIERCACHE_PATH")]
    pub path: Option<PathBuf>,

    /// TTL in seconds for writes without --ttl
    #[arg(long, env = "TIERCACHE_DEFAULT_TTL", default_value_t = 300)]
    pub default_ttl: u64,

    /// Fast tier capacity
    #[arg(long, env = "TIERCACHE_MAX_SIZE", default_value_t = 100)]
    pub max_size: usize,

    /// Keep at most this many durable records after a sweep
    #[arg(long, env = "TIERCACHE_DURABLE_MAX")]
    pub durable_max: Option<usize>,

    /// Log line format (filter with RUST_LOG)
    #[arg(long, value_enum, env = "TIERCACHE_LOG_FORMAT", default_value_t = LogFormat::Compact)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

/// Operations on the cache
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print the value stored under KEY, or `null`
    Get { key: String },
    /// Store a JSON VALUE under KEY
    Set {
        key: String,
        /// JSON document, e.g. '{"id":1}'
        value: String,
        /// TTL in seconds
        #[arg(long)]
        ttl: Option<u64>,
        /// Tag for bulk invalidation (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Remove KEY
    Delete { key: String },
    /// Remove every entry
    Clear,
    /// Remove every entry tagged TAG
    Invalidate { tag: String },
    /// List stored keys
    Keys,
    /// Purge expired entries now
    Sweep,
    /// GET a JSON URL through the cache
    Fetch {
        url: String,
        /// TTL in seconds for the cached response
        #[arg(long)]
        ttl: Option<u64>,
        /// Tag for the cached response (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Skip the cache read
        #[arg(long)]
        force: bool,
    },
}

/// Configuration derived from CLI arguments for application startup
#[derive(Debug, Clone)]
pub struct StartupConfig {
    /// Durable backend to open
    pub store: StoreKind,
    /// Cache settings
    pub cache: CacheConfig,
}

impl StartupConfig {
    /// Creates a StartupConfig from parsed CLI arguments.
    ///
    /// # Returns
    /// * `Ok(StartupConfig)` with appropriate settings
    /// * `Err(CliError::NoCacheDir)` if no path was given and none can be derived
    pub fn from_cli(cli: &Cli) -> Result<Self, CliError> {
        let store = match (cli.store, &cli.path) {
            (StoreArg::Flat, Some(dir)) => StoreKind::Flat { dir: dir.clone() },
            (StoreArg::Sqlite, Some(path)) => StoreKind::Sqlite { path: path.clone() },
            (StoreArg::Flat, None) => StoreKind::Flat {
                dir: FileStore::default_dir().ok_or(CliError::NoCacheDir)?,
            },
            (StoreArg::Sqlite, None) => StoreKind::Sqlite {
                path: FileStore::default_dir()
                    .ok_or(CliError::NoCacheDir)?
                    .join("tiercache.db"),
            },
        };

        let mut cache = CacheConfig::default()
            .with_default_ttl(Duration::from_secs(cli.default_ttl))
            .with_max_size(cli.max_size);
        if let Some(max) = cli.durable_max {
            cache = cache.with_durable_max_entries(max);
        }

        Ok(StartupConfig { store, cache })
    }
}

/// Parses a JSON value argument.
pub fn parse_json_arg(s: &str) -> Result<Value, CliError> {
    serde_json::from_str(s).map_err(|e| CliError::InvalidJson {
        input: s.to_string(),
        reason: e.to_string(),
    })
}

/// Runs one command against `cache` and returns the text to print
pub async fn execute(command: &Command, cache: &Arc<Cache>) -> Result<String, CliError> {
    match command {
        Command::Get { key } => {
            let value = cache.get::<Value>(key).await.unwrap_or(Value::Null);
            Ok(pretty(&value))
        }
        Command::Set {
            key,
            value,
            ttl,
            tags,
        } => {
            let value = parse_json_arg(value)?;
            let options = SetOptions {
                ttl: ttl.map(Duration::from_secs),
                tags: tags.clone(),
            };
            cache.set(key, &value, options).await;
            Ok(format!("stored {key}"))
        }
        Command::Delete { key } => {
            cache.delete(key).await;
            Ok(format!("deleted {key}"))
        }
        Command::Clear => {
            cache.clear().await;
            Ok("cleared".to_string())
        }
        Command::Invalidate { tag } => {
            let removed = cache.invalidate_by_tag(tag).await;
            Ok(format!("invalidated {removed} entries tagged {tag}"))
        }
        Command::Keys => {
            let mut keys = cache.durable_keys().await;
            keys.sort();
            Ok(keys.join("\n"))
        }
        Command::Sweep => {
            let report = cache.purge_expired().await;
            Ok(format!(
                "removed {} entries (expired: {}, trimmed: {}, errors: {})",
                report.removed(),
                report.fast_removed + report.durable_removed,
                report.durable_trimmed,
                report.errors
            ))
        }
        Command::Fetch {
            url,
            ttl,
            tags,
            force,
        } => {
            let fetcher = CachedFetcher::with_reqwest(Arc::clone(cache));
            let options = FetchOptions {
                cache_ttl: ttl.map(Duration::from_secs),
                cache_tags: tags.clone(),
                force_refresh: *force,
                ..FetchOptions::default()
            };
            let body: Value = fetcher.fetch(url, options).await?;
            Ok(pretty(&body))
        }
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
