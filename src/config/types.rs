use serde::Deserialize;
use std::path::PathBuf;

/// Main configuration structure for Dirscout
///
/// A machine usually plays a single role, so the `server` and `dispatcher`
/// sections are both optional; the corresponding subcommand fails fast when
/// its section is missing.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub crawl: CrawlConfig,
    pub server: Option<ServerConfig>,
    pub dispatcher: Option<DispatcherConfig>,
}

/// Per-job traversal configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlConfig {
    /// Number of concurrent traversal workers per crawl job
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// How long an idle worker waits for a pending path before terminating
    #[serde(rename = "idle-timeout-secs", default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Retry budget for a sub-path that keeps timing out
    #[serde(rename = "max-timeout-retries", default = "default_timeout_retries")]
    pub max_timeout_retries: u32,

    /// Network timeout applied to individual adapter requests
    #[serde(rename = "request-timeout-secs", default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            idle_timeout_secs: default_idle_timeout(),
            max_timeout_retries: default_timeout_retries(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_workers() -> usize {
    10
}

fn default_idle_timeout() -> u64 {
    300
}

fn default_timeout_retries() -> u32 {
    3
}

fn default_request_timeout() -> u64 {
    10
}

/// Crawl-server configuration (task runner + HTTP surface)
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP surface binds to
    #[serde(rename = "listen-address")]
    pub listen_address: String,

    /// Shared-secret token the dispatcher must present
    #[serde(rename = "api-token")]
    pub api_token: String,

    /// Maximum number of concurrent crawl jobs on this machine
    #[serde(rename = "max-processes", default = "default_max_processes")]
    pub max_processes: usize,

    /// Directory holding per-job NDJSON file-list buffers
    #[serde(rename = "buffer-directory")]
    pub buffer_directory: PathBuf,

    /// Path to the SQLite task queue database
    #[serde(rename = "database-path")]
    pub database_path: PathBuf,

    /// Optional local index handle, passed to post-crawl callbacks
    pub index: Option<IndexConfig>,
}

fn default_max_processes() -> usize {
    2
}

/// Dispatcher (fleet coordinator) configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DispatcherConfig {
    /// Seconds between reconciliation cycles
    #[serde(
        rename = "reconcile-interval-secs",
        default = "default_reconcile_interval"
    )]
    pub reconcile_interval_secs: u64,

    /// Path to the SQLite metadata store (website registry)
    #[serde(rename = "metadata-database-path")]
    pub metadata_database_path: PathBuf,

    /// External search index the reconciliation loop writes to
    pub index: IndexConfig,

    /// Registry of crawl servers
    #[serde(rename = "crawl-servers", default)]
    pub crawl_servers: Vec<CrawlServerEntry>,
}

fn default_reconcile_interval() -> u64 {
    10
}

/// Location of the external search index
#[derive(Debug, Clone, Deserialize)]
pub struct IndexConfig {
    /// Base URL of the index service
    pub url: String,

    /// Name of the index documents are written to
    #[serde(rename = "index-name")]
    pub index_name: String,
}

/// One registered crawl server
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlServerEntry {
    pub name: String,
    pub url: String,

    /// Declared maximum number of concurrent jobs, used for placement scoring
    pub slots: u32,

    /// Token presented when talking to this server
    pub token: String,
}
