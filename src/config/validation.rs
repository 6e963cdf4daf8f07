use crate::config::types::{Config, CrawlConfig, CrawlServerEntry, DispatcherConfig, ServerConfig};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawl_config(&config.crawl)?;
    if let Some(server) = &config.server {
        validate_server_config(server)?;
    }
    if let Some(dispatcher) = &config.dispatcher {
        validate_dispatcher_config(dispatcher)?;
    }
    Ok(())
}

/// Validates traversal configuration
fn validate_crawl_config(config: &CrawlConfig) -> Result<(), ConfigError> {
    if config.workers < 1 || config.workers > 100 {
        return Err(ConfigError::Validation(format!(
            "crawl.workers must be between 1 and 100, got {}",
            config.workers
        )));
    }

    if config.idle_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "crawl.idle-timeout-secs must be >= 1".to_string(),
        ));
    }

    if config.request_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "crawl.request-timeout-secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates crawl-server configuration
fn validate_server_config(config: &ServerConfig) -> Result<(), ConfigError> {
    if config.listen_address.parse::<std::net::SocketAddr>().is_err() {
        return Err(ConfigError::Validation(format!(
            "server.listen-address is not a valid socket address: '{}'",
            config.listen_address
        )));
    }

    if config.api_token.is_empty() {
        return Err(ConfigError::Validation(
            "server.api-token cannot be empty".to_string(),
        ));
    }

    if config.max_processes < 1 {
        return Err(ConfigError::Validation(
            "server.max-processes must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates dispatcher configuration
fn validate_dispatcher_config(config: &DispatcherConfig) -> Result<(), ConfigError> {
    if config.reconcile_interval_secs < 1 {
        return Err(ConfigError::Validation(
            "dispatcher.reconcile-interval-secs must be >= 1".to_string(),
        ));
    }

    if Url::parse(&config.index.url).is_err() {
        return Err(ConfigError::Validation(format!(
            "dispatcher.index.url is not a valid URL: '{}'",
            config.index.url
        )));
    }

    if config.index.index_name.is_empty() {
        return Err(ConfigError::Validation(
            "dispatcher.index.index-name cannot be empty".to_string(),
        ));
    }

    for server in &config.crawl_servers {
        validate_crawl_server_entry(server)?;
    }

    Ok(())
}

/// Validates one crawl-server registry entry
fn validate_crawl_server_entry(entry: &CrawlServerEntry) -> Result<(), ConfigError> {
    if entry.name.is_empty() {
        return Err(ConfigError::Validation(
            "crawl-server entries must have a non-empty name".to_string(),
        ));
    }

    if Url::parse(&entry.url).is_err() {
        return Err(ConfigError::Validation(format!(
            "crawl server '{}' has an invalid URL: '{}'",
            entry.name, entry.url
        )));
    }

    if entry.slots == 0 {
        return Err(ConfigError::Validation(format!(
            "crawl server '{}' must declare at least one slot",
            entry.name
        )));
    }

    if entry.token.is_empty() {
        return Err(ConfigError::Validation(format!(
            "crawl server '{}' has an empty token",
            entry.name
        )));
    }

    Ok(())
}
