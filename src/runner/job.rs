//! Job execution in isolated OS processes
//!
//! A crawl job can hold large in-memory queues and adapter connections, so
//! each job runs in its own child process: the runner re-invokes its own
//! executable with the hidden `run-task` subcommand. The child writes the
//! NDJSON buffer and prints a single `CrawlResult` JSON line on stdout; its
//! logs go to stderr and are inherited by the runner.

use crate::config::CrawlConfig;
use crate::crawler::{CrawlOptions, CrawlResult, RemoteDirectoryCrawler};
use crate::remote::SchemeRegistry;
use crate::task::{Task, TaskResult};
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

/// Path of the NDJSON buffer for one website
pub fn buffer_file(buffer_dir: &Path, website_id: i64) -> PathBuf {
    buffer_dir.join(format!("{}.ndjson", website_id))
}

/// Executes one crawl job to completion
///
/// The scheduler depends on this seam rather than on process spawning, so
/// its promotion and bookkeeping logic can be tested with stub jobs.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, task: &Task) -> TaskResult;
}

/// Production executor: one child OS process per job
pub struct ProcessExecutor {
    buffer_dir: PathBuf,
    config_path: PathBuf,
}

impl ProcessExecutor {
    pub fn new(buffer_dir: PathBuf, config_path: PathBuf) -> Self {
        Self {
            buffer_dir,
            config_path,
        }
    }
}

#[async_trait]
impl JobExecutor for ProcessExecutor {
    async fn execute(&self, task: &Task) -> TaskResult {
        run_job(task, &self.buffer_dir, &self.config_path).await
    }
}

/// Runs one crawl job to completion and returns its result
///
/// Infallible by design: a crash, kill or unreadable child still produces a
/// `TaskResult` with a descriptive status.
pub async fn run_job(task: &Task, buffer_dir: &Path, config_path: &Path) -> TaskResult {
    let start_time = Utc::now().timestamp();
    tracing::info!("starting task {} ({})", task.website_id, task.url);

    let crawl_result = spawn_job_process(task, buffer_dir, config_path).await;

    tracing::info!(
        "end task {}: {} ({} files)",
        task.website_id,
        crawl_result.status_code,
        crawl_result.file_count
    );

    TaskResult {
        website_id: task.website_id,
        status_code: crawl_result.status_code,
        file_count: crawl_result.file_count,
        start_time,
        end_time: Utc::now().timestamp(),
    }
}

async fn spawn_job_process(task: &Task, buffer_dir: &Path, config_path: &Path) -> CrawlResult {
    let exe = match std::env::current_exe() {
        Ok(path) => path,
        Err(e) => return CrawlResult::failed(format!("cannot locate executable: {}", e)),
    };
    let out_file = buffer_file(buffer_dir, task.website_id);

    let output = Command::new(exe)
        .arg("--config")
        .arg(config_path)
        .arg("run-task")
        .arg("--url")
        .arg(&task.url)
        .arg("--output")
        .arg(&out_file)
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .output()
        .await;

    match output {
        Ok(output) if output.status.success() => {
            match serde_json::from_slice(&output.stdout) {
                Ok(result) => result,
                Err(e) => CrawlResult::failed(format!("unreadable crawl result: {}", e)),
            }
        }
        Ok(output) => CrawlResult::failed(format!("crawl process exited with {}", output.status)),
        Err(e) => CrawlResult::failed(format!("failed to spawn crawl process: {}", e)),
    }
}

/// Child-process side of `run-task`: crawl one URL into `out_file`
pub async fn run_task_entry(url: &str, out_file: &Path, config: &CrawlConfig) -> CrawlResult {
    let opener = Arc::new(SchemeRegistry::new(Duration::from_secs(
        config.request_timeout_secs,
    )));
    let crawler = RemoteDirectoryCrawler::new(url, opener, CrawlOptions::from(config));
    crawler.crawl_directory(out_file).await
}
