//! Configuration loading and validation
//!
//! Dirscout is configured through a single TOML file shared by every role;
//! a machine only needs the sections for the roles it plays.

mod parser;
mod types;
mod validation;

pub use parser::{compute_config_hash, load_config, load_config_with_hash};
pub use types::{
    Config, CrawlConfig, CrawlServerEntry, DispatcherConfig, IndexConfig, ServerConfig,
};
pub use validation::validate;
