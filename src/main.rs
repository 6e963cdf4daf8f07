//! Dirscout main entry point
//!
//! One binary plays every role: `server` runs a crawl server, `dispatcher`
//! runs the fleet coordinator, and `queue`/`redispatch` are one-shot
//! dispatcher operations. The hidden `run-task` subcommand is the child
//! process a crawl server spawns for each job.

use clap::{Parser, Subcommand};
use dirscout::config::{load_config_with_hash, Config};
use dirscout::dispatcher::{CrawlServerClient, TaskDispatcher};
use dirscout::index::{ElasticIndex, NullIndex, SearchIndex, SqliteMetadata};
use dirscout::runner::{run_task_entry, serve, AppState, TaskRunner, TaskStore};
use dirscout::{ConfigError, Task};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Dirscout: a distributed open-directory indexer
///
/// Dirscout crawls publicly exposed file listings (HTTP directory indexes
/// and anonymous FTP) across a fleet of crawl servers and feeds the results
/// into a search index.
#[derive(Parser, Debug)]
#[command(name = "dirscout")]
#[command(version = "1.0.0")]
#[command(about = "A distributed open-directory indexer", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(short, long, global = true, default_value = "dirscout.toml")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a crawl server (task runner + HTTP surface)
    Server,

    /// Run the fleet dispatcher (reconciliation loop)
    Dispatcher,

    /// Queue one website for crawling through the dispatcher
    Queue {
        /// Root URL of the website (http://, https:// or ftp://)
        url: String,

        /// Numeric website id in the registry
        #[arg(long)]
        website_id: i64,

        /// Placement priority, higher pops first
        #[arg(long, default_value_t = 1)]
        priority: i64,
    },

    /// Drain every server's pending queue and re-place the tasks
    Redispatch,

    /// Crawl one URL into an NDJSON file (internal, spawned per job)
    #[command(hide = true, name = "run-task")]
    RunTask {
        #[arg(long)]
        url: String,

        #[arg(long)]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = match load_config_with_hash(&cli.config) {
        Ok(loaded) => loaded,
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    match cli.command {
        Command::Server => run_server(config, cli.config).await?,
        Command::Dispatcher => {
            let (dispatcher, _) = build_dispatcher(&config)?;
            let interval = Duration::from_secs(
                config
                    .dispatcher
                    .as_ref()
                    .map(|d| d.reconcile_interval_secs)
                    .unwrap_or(10),
            );
            dispatcher.run(interval).await;
        }
        Command::Queue {
            url,
            website_id,
            priority,
        } => {
            let (dispatcher, metadata) = build_dispatcher(&config)?;
            metadata.register_website(website_id, &url)?;
            let task = Task {
                website_id,
                url,
                priority,
                callback_type: None,
                callback_args: None,
                upload_token: None,
            };
            let server = dispatcher.dispatch_task(&task).await?;
            println!("queued website {} on {}", website_id, server);
        }
        Command::Redispatch => {
            let (dispatcher, _) = build_dispatcher(&config)?;
            let moved = dispatcher.redispatch_queued().await?;
            println!("redispatched {} tasks", moved);
        }
        Command::RunTask { url, output } => {
            let result = run_task_entry(&url, &output, &config.crawl).await;
            // The parent process reads this single line from stdout.
            println!("{}", serde_json::to_string(&result)?);
        }
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
///
/// Logs go to stderr: the `run-task` child reserves stdout for its result.
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("dirscout=info,warn"),
            1 => EnvFilter::new("dirscout=debug,info"),
            2 => EnvFilter::new("dirscout=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Runs the crawl-server role: scheduler loop plus HTTP surface
async fn run_server(config: Config, config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let server_config = config
        .server
        .clone()
        .ok_or(ConfigError::MissingSection("server"))?;

    std::fs::create_dir_all(&server_config.buffer_directory)?;
    let store = Arc::new(Mutex::new(TaskStore::new(&server_config.database_path)?));

    let index: Arc<dyn SearchIndex> = match &server_config.index {
        Some(index) => Arc::new(ElasticIndex::new(&index.url, &index.index_name)?),
        None => Arc::new(NullIndex),
    };

    let runner = Arc::new(TaskRunner::new(
        Arc::clone(&store),
        server_config.clone(),
        config_path,
        index,
    ));

    let state = AppState {
        store,
        running: runner.running_mirror(),
        buffer_dir: server_config.buffer_directory.clone(),
        api_token: server_config.api_token.clone(),
    };

    tokio::spawn(runner.run_scheduler());

    let addr = server_config.listen_address.parse()?;
    serve(state, addr).await?;
    Ok(())
}

/// Builds the dispatcher and its metadata store from the config registry
fn build_dispatcher(
    config: &Config,
) -> Result<(TaskDispatcher, Arc<SqliteMetadata>), Box<dyn std::error::Error>> {
    let dispatcher_config = config
        .dispatcher
        .as_ref()
        .ok_or(ConfigError::MissingSection("dispatcher"))?;

    let metadata = Arc::new(SqliteMetadata::new(
        &dispatcher_config.metadata_database_path,
    )?);
    let index = Arc::new(ElasticIndex::new(
        &dispatcher_config.index.url,
        &dispatcher_config.index.index_name,
    )?);

    let mut servers = Vec::new();
    for entry in &dispatcher_config.crawl_servers {
        servers.push(Arc::new(CrawlServerClient::new(entry)?));
    }
    tracing::info!("dispatcher managing {} crawl servers", servers.len());

    let metadata_handle: Arc<dyn dirscout::index::MetadataStore> = metadata.clone();
    let dispatcher = TaskDispatcher::new(servers, index, metadata_handle);
    Ok((dispatcher, metadata))
}
