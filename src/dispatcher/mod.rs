//! Fleet coordinator
//!
//! The dispatcher owns the crawl-server registry. It places new crawl tasks
//! on the least-loaded server, and its reconciliation loop claims completed
//! results, imports file lists into the search index and updates the website
//! metadata. A claimed result is the only copy in existence, so results that
//! fail to reconcile stay pending in memory and are retried every cycle.

mod client;

pub use client::CrawlServerClient;

use crate::index::{MetadataStore, SearchIndex};
use crate::task::{Task, TaskResult};
use crate::{DirscoutError, Result};
use futures_util::TryStreamExt;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio::sync::Mutex;
use tokio_util::io::StreamReader;

/// Upper bound on one bulk-import payload; a file list streams through the
/// dispatcher in chunks of at most this size, split at line boundaries
const IMPORT_CHUNK_BYTES: usize = 5 * 1024 * 1024;

/// A claimed result together with the server holding its file list
struct PendingResult {
    server: Arc<CrawlServerClient>,
    result: TaskResult,
}

pub struct TaskDispatcher {
    servers: Vec<Arc<CrawlServerClient>>,
    index: Arc<dyn SearchIndex>,
    metadata: Arc<dyn MetadataStore>,
    pending: Mutex<Vec<PendingResult>>,
}

impl TaskDispatcher {
    pub fn new(
        servers: Vec<Arc<CrawlServerClient>>,
        index: Arc<dyn SearchIndex>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        Self {
            servers,
            index,
            metadata,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Places a task on the server with the most free slots
    ///
    /// A website may be in flight on at most one server at a time, so the
    /// whole fleet is scanned before placing. Unreachable servers do not
    /// participate in the round.
    ///
    /// # Returns
    /// The name of the chosen server.
    pub async fn dispatch_task(&self, task: &Task) -> Result<String> {
        let mut best: Option<(&Arc<CrawlServerClient>, i64)> = None;

        for server in &self.servers {
            let (queued, current) = match tokio::try_join!(
                server.get_queued_tasks(),
                server.get_current_tasks()
            ) {
                Ok(state) => state,
                Err(e) => {
                    tracing::warn!("skipping unreachable server {}: {}", server.name, e);
                    continue;
                }
            };

            let in_flight = queued
                .iter()
                .chain(current.iter())
                .any(|t| t.website_id == task.website_id);
            if in_flight {
                return Err(DirscoutError::AlreadyInFlight {
                    website_id: task.website_id,
                });
            }

            let free = server.slots as i64 - (queued.len() + current.len()) as i64;
            if best.map(|(_, best_free)| free > best_free).unwrap_or(true) {
                best = Some((server, free));
            }
        }

        let (server, free) = best.ok_or(DirscoutError::NoServerAvailable {
            website_id: task.website_id,
        })?;

        server.put_task(task).await?;
        tracing::info!(
            "dispatched website {} to {} ({} free slots)",
            task.website_id,
            server.name,
            free
        );
        Ok(server.name.clone())
    }

    /// Runs the reconciliation loop forever
    pub async fn run(&self, interval: Duration) {
        let mut tick = tokio::time::interval(interval);
        loop {
            tick.tick().await;
            if let Err(e) = self.reconcile_cycle().await {
                tracing::error!("reconciliation cycle failed: {}", e);
            }
        }
    }

    /// One reconciliation pass: claim, import, free
    ///
    /// Results claimed in earlier cycles that could not be processed are
    /// retried first.
    pub async fn reconcile_cycle(&self) -> Result<()> {
        for server in &self.servers {
            match server.pop_completed().await {
                Ok(results) => {
                    let mut pending = self.pending.lock().await;
                    for result in results {
                        pending.push(PendingResult {
                            server: Arc::clone(server),
                            result,
                        });
                    }
                }
                Err(e) => {
                    tracing::warn!("cannot claim results from {}: {}", server.name, e);
                }
            }
        }

        let claimed = {
            let mut pending = self.pending.lock().await;
            std::mem::take(&mut *pending)
        };
        if claimed.is_empty() {
            return Ok(());
        }

        tracing::info!("reconciling {} completed tasks", claimed.len());
        let mut retry = Vec::new();
        for item in claimed {
            if let Err(e) = self.process_result(&item).await {
                tracing::error!(
                    "reconciliation of website {} failed, will retry: {}",
                    item.result.website_id,
                    e
                );
                retry.push(item);
            }
        }
        self.pending.lock().await.extend(retry);
        Ok(())
    }

    async fn process_result(&self, item: &PendingResult) -> Result<()> {
        let website_id = item.result.website_id;

        // Stale documents go first so a failed import never leaves the old
        // and the new listing mixed in the index.
        self.index.delete_all(website_id).await?;

        if item.result.is_success() && item.result.file_count > 0 {
            let response = item.server.fetch_file_list(website_id).await?;
            self.import_file_list(website_id, response).await?;
        }

        self.metadata.update_last_modified(website_id).await?;

        match item.server.free_file_list(website_id).await {
            Ok(()) => {}
            // Failed crawls have no buffer, and a retried result may have
            // freed it already.
            Err(DirscoutError::ServerStatus { status: 404, .. }) => {}
            Err(e) => return Err(e),
        }

        tracing::info!(
            "reconciled website {}: {} ({} files)",
            website_id,
            item.result.status_code,
            item.result.file_count
        );
        Ok(())
    }

    /// Streams an NDJSON file list into the index in bounded chunks
    ///
    /// Memory stays independent of listing size. A mid-stream failure keeps
    /// the result pending; the delete-before-import ordering in
    /// `process_result` makes the retried import safe.
    async fn import_file_list(
        &self,
        website_id: i64,
        response: reqwest::Response,
    ) -> Result<()> {
        let stream = response
            .bytes_stream()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e));
        let mut lines = StreamReader::new(stream).lines();

        let mut chunk: Vec<u8> = Vec::new();
        while let Some(line) = lines.next_line().await? {
            if line.is_empty() {
                continue;
            }
            chunk.extend_from_slice(line.as_bytes());
            chunk.push(b'\n');
            if chunk.len() >= IMPORT_CHUNK_BYTES {
                self.index.import(website_id, &chunk).await?;
                chunk.clear();
            }
        }
        if !chunk.is_empty() {
            self.index.import(website_id, &chunk).await?;
        }
        Ok(())
    }

    /// Drains every server's pending queue and re-places each task
    ///
    /// # Returns
    /// The number of tasks successfully moved.
    pub async fn redispatch_queued(&self) -> Result<usize> {
        let mut evacuated: Vec<Task> = Vec::new();
        for server in &self.servers {
            match server.pop_all_queued().await {
                Ok(tasks) => evacuated.extend(tasks),
                Err(e) => {
                    tracing::warn!("cannot drain queue of {}: {}", server.name, e);
                }
            }
        }

        let mut moved = 0;
        for task in &evacuated {
            match self.dispatch_task(task).await {
                Ok(server) => {
                    tracing::info!("redispatched website {} to {}", task.website_id, server);
                    moved += 1;
                }
                Err(e) => {
                    tracing::error!("could not redispatch website {}: {}", task.website_id, e);
                }
            }
        }
        Ok(moved)
    }
}
