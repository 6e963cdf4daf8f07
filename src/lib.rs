//! Dirscout: a distributed open-directory indexer
//!
//! This crate implements a fleet of crawl servers that traverse publicly
//! exposed file listings (HTTP directory indexes and anonymous FTP trees)
//! and a central dispatcher that load-balances crawl jobs across them and
//! reconciles the results into an external search index.

pub mod config;
pub mod crawler;
pub mod dispatcher;
pub mod index;
pub mod remote;
pub mod runner;
pub mod task;

use thiserror::Error;

/// Main error type for Dirscout operations
#[derive(Debug, Error)]
pub enum DirscoutError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Task store error: {0}")]
    Store(#[from] runner::StoreError),

    #[error("Index error: {0}")]
    Index(#[from] index::IndexError),

    #[error("Metadata store error: {0}")]
    Metadata(#[from] index::MetadataError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Crawl server {server} returned HTTP {status}")]
    ServerStatus { server: String, status: u16 },

    #[error("No crawl server can accept website {website_id}")]
    NoServerAvailable { website_id: i64 },

    #[error("Website {website_id} is already queued or running on the fleet")]
    AlreadyInFlight { website_id: i64 },
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Missing config section: [{0}]")]
    MissingSection(&'static str),
}

/// Result type alias for Dirscout operations
pub type Result<T> = std::result::Result<T, DirscoutError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{CrawlResult, RemoteDirectoryCrawler};
pub use remote::{File, ListingError, RemoteDirectory};
pub use task::{Task, TaskResult};
