//! Crawl-server task runner
//!
//! Runs at most `max-processes` crawl jobs concurrently on one machine, each
//! in its own OS process, and exposes job state over a small HTTP surface.
//! The scheduler loop is the sole authority over the running-job set; jobs
//! report their finish over a channel rather than mutating shared state.

mod callbacks;
mod job;
mod server;
mod store;

pub use callbacks::{resolve_callback, PostCrawlCallback, WebhookCallback};
pub use job::{buffer_file, run_job, run_task_entry, JobExecutor, ProcessExecutor};
pub use server::{build_router, serve, AppState};
pub use store::{StoreError, StoreResult, TaskStore};

use crate::config::ServerConfig;
use crate::index::SearchIndex;
use crate::task::{Task, TaskResult};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;

/// Interval between scheduler polls of the durable queue
const SCHEDULER_TICK: Duration = Duration::from_secs(1);

enum JobEvent {
    Finished { task: Task, result: TaskResult },
}

/// Per-machine job scheduler
pub struct TaskRunner {
    store: Arc<Mutex<TaskStore>>,
    /// Read-only mirror of the running set for HTTP introspection; written
    /// only by the scheduler loop
    running: Arc<RwLock<HashMap<i64, Task>>>,
    config: ServerConfig,
    executor: Arc<dyn JobExecutor>,
    index: Arc<dyn SearchIndex>,
}

impl TaskRunner {
    pub fn new(
        store: Arc<Mutex<TaskStore>>,
        config: ServerConfig,
        config_path: PathBuf,
        index: Arc<dyn SearchIndex>,
    ) -> Self {
        let executor = Arc::new(ProcessExecutor::new(
            config.buffer_directory.clone(),
            config_path,
        ));
        Self::with_executor(store, config, executor, index)
    }

    /// Builds a runner around a custom job executor
    pub fn with_executor(
        store: Arc<Mutex<TaskStore>>,
        config: ServerConfig,
        executor: Arc<dyn JobExecutor>,
        index: Arc<dyn SearchIndex>,
    ) -> Self {
        Self {
            store,
            running: Arc::new(RwLock::new(HashMap::new())),
            config,
            executor,
            index,
        }
    }

    /// Shared handle to the running-task mirror, for the HTTP surface
    pub fn running_mirror(&self) -> Arc<RwLock<HashMap<i64, Task>>> {
        Arc::clone(&self.running)
    }

    /// Runs the scheduler loop forever
    ///
    /// Promotion of queued tasks is serialized here, so the running-count
    /// check-and-increment is atomic by construction.
    pub async fn run_scheduler(self: Arc<Self>) {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel::<JobEvent>();
        let mut tick = tokio::time::interval(SCHEDULER_TICK);
        let mut running_count = 0usize;

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    while running_count < self.config.max_processes {
                        let popped = self.store.lock().unwrap().pop_task();
                        match popped {
                            Ok(Some(task)) => {
                                running_count += 1;
                                self.running
                                    .write()
                                    .unwrap()
                                    .insert(task.website_id, task.clone());
                                tracing::info!(
                                    "promoting task {} ({} of {} slots in use)",
                                    task.website_id,
                                    running_count,
                                    self.config.max_processes
                                );
                                self.spawn_job(task, events_tx.clone());
                            }
                            Ok(None) => break,
                            Err(e) => {
                                tracing::error!("task queue read failed: {}", e);
                                break;
                            }
                        }
                    }
                }
                Some(event) = events_rx.recv() => {
                    let JobEvent::Finished { task, result } = event;
                    running_count = running_count.saturating_sub(1);
                    self.finish_job(task, result);
                }
            }
        }
    }

    fn spawn_job(&self, task: Task, events: mpsc::UnboundedSender<JobEvent>) {
        let executor = Arc::clone(&self.executor);
        tokio::spawn(async move {
            let result = executor.execute(&task).await;
            // The receiver lives as long as the scheduler loop.
            let _ = events.send(JobEvent::Finished { task, result });
        });
    }

    /// Records a finished job: result first, bookkeeping second, hooks last
    fn finish_job(&self, task: Task, result: TaskResult) {
        if let Err(e) = self.store.lock().unwrap().log_result(&result) {
            // The result would otherwise be lost; this needs operator attention.
            tracing::error!(
                "could not record result for website {}: {}",
                result.website_id,
                e
            );
        }

        self.running.write().unwrap().remove(&task.website_id);

        if let Some(callback) = callbacks::resolve_callback(&task) {
            let index = Arc::clone(&self.index);
            tokio::spawn(async move {
                if let Err(e) = callback.run(&result, index.as_ref()).await {
                    tracing::warn!(
                        "post-crawl callback failed for website {}: {}",
                        result.website_id,
                        e
                    );
                }
            });
        }
    }
}
