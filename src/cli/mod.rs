use std::env;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

use crate::app::App;
use crate::config::{AppConfig, ConfigLoader, CONFIG_ENV, DATA_ENV};
use crate::model::today_at;
use crate::offline::OfflineCache;
use crate::source::{HttpJobSource, HttpTransport, JobSource, SnapshotSource};
use crate::storage::{self, MemoryStore, SharedStore};

pub mod commands;

use self::commands::{BookmarkArgs, CacheArgs, ListArgs, RecentArgs};

const LOG_FILE: &str = "jobtui.log";

#[derive(Parser, Debug)]
#[command(
    name = "jobtui",
    version,
    about = "Terminal browser for public job listings"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Override the config file location (takes precedence over JOBTUI_CONFIG)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override the data directory (takes precedence over JOBTUI_DATA)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Minimum log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Origin of the jobs proxy, e.g. http://127.0.0.1:8788
    #[arg(long)]
    pub base_url: Option<String>,

    /// Keep bookmarks, history and caches in memory for this run only
    #[arg(long)]
    pub ephemeral: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Launch the interactive TUI (default)
    Tui,
    /// Fetch, filter and print listings without the TUI
    List(ListArgs),
    /// Manage bookmarks, their tags and notes
    Bookmark(BookmarkArgs),
    /// Show or clear recent searches
    Recent(RecentArgs),
    /// Manage the offline cache
    Cache(CacheArgs),
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Some(path) = &cli.config {
        env::set_var(CONFIG_ENV, path);
    }
    if let Some(path) = &cli.data_dir {
        env::set_var(DATA_ENV, path);
    }

    let loader = ConfigLoader::discover()?;
    loader.paths().ensure_directories()?;
    let paths = loader.paths().clone();
    let command = cli.command.unwrap_or(Commands::Tui);
    let log_file = matches!(command, Commands::Tui).then(|| paths.log_dir.join(LOG_FILE));
    init_tracing(&cli.log_level, log_file.as_deref())
        .with_context(|| format!("initialising logging at level {}", cli.log_level))?;

    let mut config = loader.load_or_init()?;
    if let Some(base_url) = cli.base_url {
        config.api.base_url = base_url;
    }
    let store: SharedStore = if cli.ephemeral {
        tracing::info!("using in-memory storage");
        MemoryStore::shared()
    } else {
        storage::init(&paths, &config.storage)?.shared()
    };
    let cache = offline_cache(&config, &store);
    let config = Arc::new(config);

    match command {
        Commands::Tui => {
            let source = Arc::new(http_source(&config, cache));
            let mut app = App::new(config.clone(), store, source)?;
            commands::run_tui(&mut app)
        }
        Commands::List(args) => {
            let today = today_at(config.utc_offset());
            let fallback = config.offline.fallback_to_snapshot;
            let source: Box<dyn JobSource> = if args.offline {
                Box::new(SnapshotSource::new(store.clone()))
            } else {
                Box::new(http_source(&config, cache))
            };
            commands::list_jobs(&*source, store, config.default_sort, today, fallback, args)
        }
        Commands::Bookmark(args) => commands::handle_bookmark_command(store, args),
        Commands::Recent(args) => {
            commands::handle_recent_command(store, config.search.recent_limit, args)
        }
        Commands::Cache(args) => {
            let cache = cache.unwrap_or_else(|| {
                Arc::new(OfflineCache::new(
                    store.clone(),
                    config.api.origin(),
                    &config.offline.cache_version,
                ))
            });
            commands::handle_cache_command(&cache, &HttpTransport::new(), args)
        }
    }
}

/// Activates the configured cache version, purging entries left by older ones.
fn offline_cache(config: &AppConfig, store: &SharedStore) -> Option<Arc<OfflineCache>> {
    if !config.offline.enabled {
        return None;
    }
    let cache = OfflineCache::new(
        store.clone(),
        config.api.origin(),
        &config.offline.cache_version,
    );
    if let Err(err) = cache.activate() {
        tracing::warn!(?err, "failed to purge old offline cache versions");
    }
    Some(Arc::new(cache))
}

fn http_source(config: &AppConfig, cache: Option<Arc<OfflineCache>>) -> HttpJobSource {
    let source = HttpJobSource::new(config.api.jobs_url());
    tracing::debug!(url = source.url(), "jobs endpoint");
    match cache {
        Some(cache) => source.with_cache(cache),
        None => source,
    }
}

/// Logs go to a file while the TUI owns the terminal, to stderr otherwise.
fn init_tracing(level: &str, log_file: Option<&Path>) -> Result<()> {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_try_init(|| {
        let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
        match log_file {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)
                        .with_context(|| format!("creating log dir {}", parent.display()))?;
                }
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("opening log file {}", path.display()))?;
                fmt()
                    .with_env_filter(env_filter)
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .init();
            }
            None => {
                fmt()
                    .with_env_filter(env_filter)
                    .with_writer(std::io::stderr)
                    .init();
            }
        }
        Ok::<(), anyhow::Error>(())
    })
    .map(|_| ())
}
