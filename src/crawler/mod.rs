//! Concurrent remote-directory traversal
//!
//! The crawler drives one job: it fetches the root listing synchronously,
//! then runs N worker tasks that share a joinable work queue of pending
//! sub-paths and a set of already-seen listing fingerprints. Discovered
//! files stream to an NDJSON sink; directories are traversal state only.
//!
//! A crawl always produces a [`CrawlResult`], never an error.

mod sink;
mod work_queue;

pub use work_queue::WorkQueue;

use crate::config::CrawlConfig;
use crate::remote::{DirectoryOpener, File, ListingError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

/// Traversal tuning knobs
#[derive(Debug, Clone)]
pub struct CrawlOptions {
    /// Number of concurrent traversal workers
    pub workers: usize,

    /// How long an idle worker waits for a pending path before terminating
    pub idle_timeout: Duration,

    /// Retry budget for a sub-path that keeps timing out
    pub max_timeout_retries: u32,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            workers: 10,
            idle_timeout: Duration::from_secs(300),
            max_timeout_retries: 3,
        }
    }
}

impl From<&CrawlConfig> for CrawlOptions {
    fn from(config: &CrawlConfig) -> Self {
        Self {
            workers: config.workers,
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
            max_timeout_retries: config.max_timeout_retries,
        }
    }
}

/// Outcome of one crawl job
///
/// `status_code` is `"success"`, `"timeout"`, or a descriptive error string;
/// failures never escape the job boundary as errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlResult {
    pub file_count: u64,
    pub status_code: String,
}

impl CrawlResult {
    pub fn success(file_count: u64) -> Self {
        Self {
            file_count,
            status_code: "success".to_string(),
        }
    }

    pub fn failed(status_code: impl Into<String>) -> Self {
        Self {
            file_count: 0,
            status_code: status_code.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status_code == "success"
    }
}

/// How a worker left the traversal
enum WorkerExit {
    /// No pending work within the idle timeout, or the queue was closed
    Idle,

    /// The remote enforced a connection limit; the worker requeued its path
    /// and abandoned its connection
    ConnectionLimit,
}

/// Traverses one website's directory tree and emits a flat file list
pub struct RemoteDirectoryCrawler {
    url: String,
    opener: Arc<dyn DirectoryOpener>,
    options: CrawlOptions,
}

impl RemoteDirectoryCrawler {
    pub fn new(url: impl Into<String>, opener: Arc<dyn DirectoryOpener>, options: CrawlOptions) -> Self {
        Self {
            url: url.into(),
            opener,
            options,
        }
    }

    /// Crawls the whole tree, writing NDJSON file records to `out_file`
    ///
    /// Returns once the work queue is drained and no worker holds an item.
    /// Failure to obtain the root listing aborts the job with zero files;
    /// sub-path failures only drop the affected path.
    pub async fn crawl_directory(&self, out_file: &Path) -> CrawlResult {
        // Root listing is fetched synchronously; its failure is fatal to the job.
        let root_listing = {
            let mut root = match self.opener.open(&self.url).await {
                Ok(directory) => directory,
                Err(e) => return CrawlResult::failed(root_status(&e)),
            };
            let listing = root.list_dir("").await;
            root.close().await;
            match listing {
                Ok(listing) => listing,
                Err(e) => return CrawlResult::failed(root_status(&e)),
            }
        };
        let (root_fingerprint, root_entries) = root_listing;

        let queue: Arc<WorkQueue<String>> = Arc::new(WorkQueue::new());
        let fingerprints = Arc::new(Mutex::new(HashSet::new()));
        fingerprints.lock().unwrap().insert(root_fingerprint);

        let (records, writer) = sink::spawn_writer(out_file.to_path_buf(), 1024);

        for entry in root_entries {
            if entry.is_dir {
                queue.push(format!("{}/", entry.child_path()));
            } else if records.send(entry).await.is_err() {
                return CrawlResult::failed("output sink failed");
            }
        }

        let mut workers = JoinSet::new();
        for _ in 0..self.options.workers {
            self.spawn_worker(&mut workers, &queue, &fingerprints, &records);
        }

        // Workers killed by a connection limit leave their path requeued;
        // replace them (bounded) so the path is retried on a fresh connection.
        let mut respawns_left = self.options.workers.max(1) * 2;
        loop {
            tokio::select! {
                _ = queue.join() => break,
                exited = workers.join_next() => match exited {
                    Some(Ok(WorkerExit::ConnectionLimit))
                        if respawns_left > 0 && !queue.is_idle() =>
                    {
                        respawns_left -= 1;
                        tracing::info!("worker hit a connection limit, spawning replacement");
                        self.spawn_worker(&mut workers, &queue, &fingerprints, &records);
                    }
                    Some(_) => {
                        if workers.is_empty() {
                            // Nobody left to drain the queue; pending paths
                            // are dropped for this job.
                            break;
                        }
                    }
                    None => break,
                }
            }
        }

        // Signal outstanding workers to terminate.
        queue.close();
        while workers.join_next().await.is_some() {}
        drop(records);

        match writer.await {
            Ok(Ok(file_count)) => CrawlResult::success(file_count),
            Ok(Err(e)) => CrawlResult::failed(format!("output sink failed: {}", e)),
            Err(e) => CrawlResult::failed(format!("output sink failed: {}", e)),
        }
    }

    fn spawn_worker(
        &self,
        workers: &mut JoinSet<WorkerExit>,
        queue: &Arc<WorkQueue<String>>,
        fingerprints: &Arc<Mutex<HashSet<String>>>,
        records: &mpsc::Sender<File>,
    ) {
        let url = self.url.clone();
        let opener = Arc::clone(&self.opener);
        let queue = Arc::clone(queue);
        let fingerprints = Arc::clone(fingerprints);
        let records = records.clone();
        let options = self.options.clone();
        workers.spawn(worker_loop(
            url,
            opener,
            queue,
            fingerprints,
            records,
            options,
        ));
    }
}

/// One traversal worker: owns a private adapter connection and loops over
/// pending paths until idle, cancelled, or cut off by a connection limit
async fn worker_loop(
    url: String,
    opener: Arc<dyn DirectoryOpener>,
    queue: Arc<WorkQueue<String>>,
    fingerprints: Arc<Mutex<HashSet<String>>>,
    records: mpsc::Sender<File>,
    options: CrawlOptions,
) -> WorkerExit {
    let mut directory = match opener.open(&url).await {
        Ok(directory) => directory,
        Err(ListingError::ConnectionLimit) => return WorkerExit::ConnectionLimit,
        Err(e) => {
            tracing::warn!("worker could not open {}: {}", url, e);
            return WorkerExit::Idle;
        }
    };

    let mut timeout_retries = options.max_timeout_retries;

    loop {
        let Some(path) = queue.pop(options.idle_timeout).await else {
            directory.close().await;
            return WorkerExit::Idle;
        };

        match directory.list_dir(&path).await {
            Ok((fingerprint, listing)) => {
                let fresh =
                    !listing.is_empty() && fingerprints.lock().unwrap().insert(fingerprint);
                if fresh {
                    timeout_retries = options.max_timeout_retries;
                    tracing::debug!("listed '{}' ({} entries)", path, listing.len());
                    for entry in listing {
                        if entry.is_dir {
                            queue.push(format!("{}/", entry.child_path()));
                        } else if records.send(entry).await.is_err() {
                            queue.task_done();
                            directory.close().await;
                            return WorkerExit::Idle;
                        }
                    }
                } else {
                    tracing::debug!("skipped '{}': empty or already-seen listing", path);
                }
                queue.task_done();
            }
            Err(ListingError::ConnectionLimit) => {
                // Resubmit the path unchanged; this connection is done for.
                tracing::info!("connection limit at '{}', requeueing", path);
                queue.push(path);
                queue.task_done();
                directory.close().await;
                return WorkerExit::ConnectionLimit;
            }
            Err(ListingError::Timeout { .. }) => {
                if timeout_retries > 0 {
                    timeout_retries -= 1;
                    tracing::debug!("timeout at '{}', {} retries left", path, timeout_retries);
                    queue.push(path);
                } else {
                    tracing::warn!("dropping '{}' after repeated timeouts", path);
                }
                queue.task_done();
            }
            Err(e) => {
                tracing::warn!("skipping '{}': {}", path, e);
                queue.task_done();
            }
        }
    }
}

/// Maps a root-listing failure to a job status string
fn root_status(error: &ListingError) -> String {
    match error {
        ListingError::Timeout { .. } => "timeout".to_string(),
        other => other.to_string(),
    }
}
