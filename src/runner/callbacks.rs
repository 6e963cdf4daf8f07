//! Post-crawl notification hooks
//!
//! A strategy is resolved once per task from `callback_type` and invoked
//! with only the task's result and a handle to the index. Hook failures are
//! logged and never lose the `TaskResult`, which is stored beforehand.

use crate::index::SearchIndex;
use crate::task::{Task, TaskResult};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

#[async_trait]
pub trait PostCrawlCallback: Send + Sync {
    async fn run(&self, result: &TaskResult, index: &dyn SearchIndex) -> anyhow::Result<()>;
}

/// Resolves the callback strategy for a task, if any
pub fn resolve_callback(task: &Task) -> Option<Box<dyn PostCrawlCallback>> {
    match task.callback_type.as_deref() {
        Some("webhook") => WebhookCallback::from_args(task.callback_args.as_deref())
            .map(|callback| Box::new(callback) as Box<dyn PostCrawlCallback>),
        Some(other) => {
            tracing::warn!(
                "unknown callback type '{}' for website {}",
                other,
                task.website_id
            );
            None
        }
        None => None,
    }
}

#[derive(Debug, Deserialize)]
struct WebhookArgs {
    url: String,
}

/// Posts the finished task's result as JSON to a configured URL
pub struct WebhookCallback {
    url: String,
    http: reqwest::Client,
}

impl WebhookCallback {
    fn from_args(args: Option<&str>) -> Option<Self> {
        let raw = args?;
        let parsed: WebhookArgs = match serde_json::from_str(raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("invalid webhook callback args '{}': {}", raw, e);
                return None;
            }
        };
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .ok()?;
        Some(Self {
            url: parsed.url,
            http,
        })
    }
}

#[async_trait]
impl PostCrawlCallback for WebhookCallback {
    async fn run(&self, result: &TaskResult, _index: &dyn SearchIndex) -> anyhow::Result<()> {
        self.http
            .post(&self.url)
            .json(result)
            .send()
            .await?
            .error_for_status()?;
        tracing::info!(
            "webhook notified for website {} ({})",
            result.website_id,
            self.url
        );
        Ok(())
    }
}
