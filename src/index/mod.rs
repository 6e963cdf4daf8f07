//! Narrow interfaces to external collaborators
//!
//! The search index and the relational metadata store are separate services;
//! the dispatcher and the post-crawl callbacks only ever touch them through
//! these traits.

mod elastic;
mod metadata;

pub use elastic::ElasticIndex;
pub use metadata::SqliteMetadata;

use async_trait::async_trait;
use thiserror::Error;

/// Errors from the external search index
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("index rejected request: HTTP {0}")]
    Status(u16),

    #[error("malformed file record: {0}")]
    Record(#[from] serde_json::Error),
}

/// The external full-text file index
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Bulk-imports NDJSON file records for one website
    async fn import(&self, website_id: i64, ndjson: &[u8]) -> Result<(), IndexError>;

    /// Deletes every indexed document for one website (overwrite semantics)
    async fn delete_all(&self, website_id: i64) -> Result<(), IndexError>;
}

/// No-op index for crawl servers without a local index handle
pub struct NullIndex;

#[async_trait]
impl SearchIndex for NullIndex {
    async fn import(&self, _website_id: i64, _ndjson: &[u8]) -> Result<(), IndexError> {
        Ok(())
    }

    async fn delete_all(&self, _website_id: i64) -> Result<(), IndexError> {
        Ok(())
    }
}

/// Errors from the metadata store
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("metadata database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// The relational metadata store (website registry subset the dispatcher touches)
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Records that a website was (re)scanned just now
    async fn update_last_modified(&self, website_id: i64) -> Result<(), MetadataError>;
}
