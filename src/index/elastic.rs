//! Elasticsearch-backed file index client
//!
//! Talks to the index service with two operations only: `_bulk` imports of
//! NDJSON file records (annotated with their website id) and
//! `_delete_by_query` for overwrite semantics on rescan.

use crate::index::{IndexError, SearchIndex};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

/// Records per `_bulk` request
const BULK_CHUNK: usize = 10_000;

pub struct ElasticIndex {
    http: Client,
    url: String,
    index_name: String,
}

impl ElasticIndex {
    pub fn new(url: &str, index_name: &str) -> Result<Self, IndexError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            http,
            url: url.trim_end_matches('/').to_string(),
            index_name: index_name.to_string(),
        })
    }

    async fn send_bulk(&self, body: String) -> Result<(), IndexError> {
        let response = self
            .http
            .post(format!("{}/{}/_bulk", self.url, self.index_name))
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(IndexError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl SearchIndex for ElasticIndex {
    async fn import(&self, website_id: i64, ndjson: &[u8]) -> Result<(), IndexError> {
        let text = String::from_utf8_lossy(ndjson);
        let mut body = String::new();
        let mut pending = 0usize;

        for line in text.lines() {
            if line.is_empty() {
                continue;
            }
            let mut record: Value = serde_json::from_str(line)?;
            if let Some(object) = record.as_object_mut() {
                object.insert("website_id".to_string(), json!(website_id));
            }

            body.push_str("{\"index\":{}}\n");
            body.push_str(&record.to_string());
            body.push('\n');
            pending += 1;

            if pending == BULK_CHUNK {
                self.send_bulk(std::mem::take(&mut body)).await?;
                pending = 0;
            }
        }

        if pending > 0 {
            self.send_bulk(body).await?;
        }

        tracing::info!("imported file records for website {}", website_id);
        Ok(())
    }

    async fn delete_all(&self, website_id: i64) -> Result<(), IndexError> {
        let response = self
            .http
            .post(format!(
                "{}/{}/_delete_by_query",
                self.url, self.index_name
            ))
            .json(&json!({
                "query": { "term": { "website_id": website_id } }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(IndexError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}
