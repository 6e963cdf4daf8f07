//! Task and result records shared by the crawl server and the dispatcher

use serde::{Deserialize, Serialize};

/// One website crawl request
///
/// A `website_id` identifies one in-flight job and must never be assigned to
/// more than one crawl server at a time; the dispatcher's placement logic
/// and the runner's queue bookkeeping both enforce this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub website_id: i64,
    pub url: String,

    /// Higher priority runs first; FIFO within a priority
    #[serde(default = "default_priority")]
    pub priority: i64,

    /// Post-crawl notification strategy ("webhook"), if any
    #[serde(default)]
    pub callback_type: Option<String>,

    /// JSON arguments for the callback strategy
    #[serde(default)]
    pub callback_args: Option<String>,

    /// Token the crawl server may use when pushing artifacts upstream
    #[serde(default)]
    pub upload_token: Option<String>,
}

fn default_priority() -> i64 {
    1
}

/// Produced exactly once per completed task
///
/// `status_code` mirrors [`crate::CrawlResult::status_code`]; timestamps are
/// epoch seconds recorded by the runner around the job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub website_id: i64,
    pub status_code: String,
    pub file_count: u64,
    pub start_time: i64,
    pub end_time: i64,
}

impl TaskResult {
    pub fn is_success(&self) -> bool {
        self.status_code == "success"
    }
}
