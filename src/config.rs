use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::floor::{DEFAULT_MAX_CONTENT_LENGTH, DEFAULT_PREFETCH_SIZE};

/// Overrides `[search] url` from the config file.
pub const SEARCH_URL_ENV: &str = "TREEHOLE_SEARCH_URL";

#[derive(Parser, Debug)]
#[command(name = "treehole", about = "Posting and ordering core for an anonymous board")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Path to data directory
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Search index base URL
    #[arg(long)]
    pub search_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Apply database migrations and exit
    Migrate,
    /// Open a new hole
    NewHole {
        #[arg(long)]
        user: i64,
        content: String,
    },
    /// Post a floor into a hole
    Post {
        hole: i64,
        #[arg(long)]
        user: i64,
        /// Floor to reply to, 0 for top level
        #[arg(long, default_value_t = 0)]
        reply_to: i64,
        content: String,
    },
    /// Like (1), dislike (-1) or clear (0) a floor
    React {
        floor: i64,
        #[arg(long)]
        user: i64,
        #[arg(allow_negative_numbers = true)]
        value: i64,
    },
    /// Soft-delete a floor
    Delete {
        floor: i64,
        #[arg(long)]
        user: i64,
        #[arg(long, default_value = "deleted")]
        reason: String,
    },
    /// Print a hole's floors in reading order and count a view
    Show { hole: i64 },
    /// List recent holes with their prefetched floors
    Holes {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Search floor content
    Search {
        keyword: String,
        #[arg(long)]
        accurate: bool,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long, default_value_t = 10)]
        size: usize,
    },
    /// Push every indexable floor to the search index
    Reindex,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub floors: FloorsConfig,
    pub search: SearchConfig,
    pub views: ViewsConfig,
    pub names: NamesConfig,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct FloorsConfig {
    pub prefetch_size: usize,
    pub max_content_length: usize,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SearchConfig {
    /// No URL disables the index.
    pub url: Option<String>,
    pub workers: usize,
    pub bulk_budget_bytes: usize,
    pub timeout_secs: u64,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ViewsConfig {
    pub flush_interval_secs: u64,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct NamesConfig {
    /// JSON array of names; the built-in pool is used when unset.
    pub path: Option<PathBuf>,
}

impl Default for FloorsConfig {
    fn default() -> Self {
        Self {
            prefetch_size: DEFAULT_PREFETCH_SIZE,
            max_content_length: DEFAULT_MAX_CONTENT_LENGTH,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            url: None,
            workers: 2,
            bulk_budget_bytes: 1 << 20,
            timeout_secs: 10,
        }
    }
}

impl Default for ViewsConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: 60,
        }
    }
}

impl SearchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ViewsConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs.max(1))
    }
}

impl Config {
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        Self::load_with_env(cli, std::env::var(SEARCH_URL_ENV).ok())
    }

    /// `load` with the `TREEHOLE_SEARCH_URL` value passed in.
    pub fn load_with_env(cli: &Cli, env_search_url: Option<String>) -> anyhow::Result<Self> {
        let data_dir = Self::data_dir(cli);
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| data_dir.join("config.toml"));

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            Config::default()
        };

        // Environment, then CLI, overrides
        config.override_search_url(env_search_url);
        config.override_search_url(cli.search_url.clone());

        // Resolve paths relative to data dir
        if config.database.path.is_none() {
            config.database.path = Some(data_dir.join("treehole.db"));
        }

        Ok(config)
    }

    /// A blank value disables the index.
    pub fn override_search_url(&mut self, url: Option<String>) {
        if let Some(url) = url {
            let url = url.trim();
            self.search.url = if url.is_empty() {
                None
            } else {
                Some(url.to_string())
            };
        }
    }

    pub fn data_dir(cli: &Cli) -> PathBuf {
        cli.data_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".treehole")
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from("treehole.db"))
    }
}
