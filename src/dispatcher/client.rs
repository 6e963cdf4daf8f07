//! HTTP client for one registered crawl server

use crate::config::CrawlServerEntry;
use crate::task::{Task, TaskResult};
use crate::{DirscoutError, Result};
use std::time::Duration;

/// Request timeout for dispatcher-to-server calls
const CLIENT_TIMEOUT: Duration = Duration::from_secs(15);

/// Handle to a single crawl server's HTTP surface
pub struct CrawlServerClient {
    pub name: String,
    pub url: String,
    pub slots: u32,
    token: String,
    http: reqwest::Client,
}

impl CrawlServerClient {
    pub fn new(entry: &CrawlServerEntry) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(CLIENT_TIMEOUT)
            .build()?;
        Ok(Self {
            name: entry.name.clone(),
            url: entry.url.trim_end_matches('/').to_string(),
            slots: entry.slots,
            token: entry.token.clone(),
            http,
        })
    }

    fn check_status(&self, response: &reqwest::Response) -> Result<()> {
        if response.status().is_success() {
            Ok(())
        } else {
            Err(DirscoutError::ServerStatus {
                server: self.name.clone(),
                status: response.status().as_u16(),
            })
        }
    }

    /// Queues a task on this server
    pub async fn put_task(&self, task: &Task) -> Result<()> {
        let response = self
            .http
            .post(format!("{}/task/put", self.url))
            .bearer_auth(&self.token)
            .json(task)
            .send()
            .await?;
        self.check_status(&response)
    }

    /// Tasks waiting in this server's durable queue
    pub async fn get_queued_tasks(&self) -> Result<Vec<Task>> {
        let response = self
            .http
            .get(format!("{}/task/", self.url))
            .bearer_auth(&self.token)
            .send()
            .await?;
        self.check_status(&response)?;
        Ok(response.json().await?)
    }

    /// Tasks currently being crawled on this server
    pub async fn get_current_tasks(&self) -> Result<Vec<Task>> {
        let response = self
            .http
            .get(format!("{}/task/current", self.url))
            .bearer_auth(&self.token)
            .send()
            .await?;
        self.check_status(&response)?;
        Ok(response.json().await?)
    }

    /// Claims completed results; the server will not return them again
    pub async fn pop_completed(&self) -> Result<Vec<TaskResult>> {
        let response = self
            .http
            .get(format!("{}/task/completed", self.url))
            .bearer_auth(&self.token)
            .send()
            .await?;
        self.check_status(&response)?;
        Ok(response.json().await?)
    }

    /// Drains the server's pending queue (evacuation)
    pub async fn pop_all_queued(&self) -> Result<Vec<Task>> {
        let response = self
            .http
            .get(format!("{}/task/pop_all", self.url))
            .bearer_auth(&self.token)
            .send()
            .await?;
        self.check_status(&response)?;
        Ok(response.json().await?)
    }

    /// Opens a streaming download of the NDJSON file list buffered for a
    /// website; file lists can run into millions of lines, so the body is
    /// never buffered whole
    pub async fn fetch_file_list(&self, website_id: i64) -> Result<reqwest::Response> {
        let response = self
            .http
            .get(format!("{}/file_list/{}/", self.url, website_id))
            .bearer_auth(&self.token)
            .send()
            .await?;
        self.check_status(&response)?;
        Ok(response)
    }

    /// Deletes the buffered file list on the server
    pub async fn free_file_list(&self, website_id: i64) -> Result<()> {
        let response = self
            .http
            .get(format!("{}/file_list/{}/free", self.url, website_id))
            .bearer_auth(&self.token)
            .send()
            .await?;
        self.check_status(&response)
    }
}
