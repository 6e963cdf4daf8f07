//! Remote directory adapters
//!
//! One adapter per URL scheme: HTTP/HTTPS directory index pages and
//! anonymous FTP trees. Adapters are leaf components; they know nothing
//! about traversal, queues or jobs. Each call to [`RemoteDirectory::list_dir`]
//! returns the entries of one directory plus a content fingerprint used by
//! the crawler for loop and mirror detection.

mod ftp;
mod http;

pub use ftp::FtpDirectory;
pub use http::HttpDirectory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// A single entry discovered in a remote directory listing
///
/// `path` is the logical path of the entry's parent directory, relative to
/// the job's base URL and without a trailing slash (the root is the empty
/// string). Directories are transient traversal state; `is_dir` is never
/// serialized and directories are never written to the output stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    pub name: String,
    pub path: String,
    /// Size in bytes, -1 when unknown
    pub size: i64,
    /// Modification time in epoch seconds, 0 when unknown
    pub mtime: i64,
    #[serde(skip)]
    pub is_dir: bool,
}

impl File {
    /// Logical path of this entry itself: `{path}/{name}` (no trailing slash)
    pub fn child_path(&self) -> String {
        if self.path.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.path, self.name)
        }
    }

    /// Byte representation fed into a listing fingerprint
    ///
    /// Deliberately excludes `path`: the same directory content reached
    /// through a different route (symlink cycle, mirror) must hash the same.
    fn fingerprint_bytes(&self) -> Vec<u8> {
        format!(
            "{}|{}|{}|{}",
            self.name,
            if self.is_dir { "D" } else { "F" },
            self.size,
            self.mtime
        )
        .into_bytes()
    }
}

/// Content fingerprint of one directory listing (hex-encoded SHA-256)
pub type Fingerprint = String;

/// Computes the fingerprint of a listing
///
/// Entries are hashed in name order so that adapters resolving metadata
/// concurrently produce the same fingerprint for the same content.
pub fn listing_fingerprint(entries: &[File]) -> Fingerprint {
    let mut sorted: Vec<&File> = entries.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    let mut hasher = Sha256::new();
    for entry in sorted {
        hasher.update(entry.fingerprint_bytes());
    }
    hex::encode(hasher.finalize())
}

/// A directory listing: content fingerprint plus entries
pub type Listing = (Fingerprint, Vec<File>);

/// Errors from listing a remote directory
#[derive(Debug, Error)]
pub enum ListingError {
    /// The remote enforces a connection-count limit. The caller must abandon
    /// this connection and requeue the affected path, not retry in place.
    #[error("remote enforces a connection limit")]
    ConnectionLimit,

    /// Transient network failure; retried a bounded number of times by the caller
    #[error("listing timed out for '{path}'")]
    Timeout { path: String },

    /// Malformed listing; the path is skipped and traversal continues
    #[error("could not parse listing for '{path}': {message}")]
    Parse { path: String, message: String },

    /// Generic failure; fatal only when it hits the root listing
    #[error("listing failed for '{path}': {message}")]
    Failed { path: String, message: String },
}

/// Protocol-specific directory listing client
///
/// `path` is a logical sub-path relative to the job's base URL: `""` for the
/// root, `"sub/dir/"` (trailing slash) for nested directories.
#[async_trait]
pub trait RemoteDirectory: Send {
    async fn list_dir(&mut self, path: &str) -> Result<Listing, ListingError>;

    async fn close(&mut self);
}

/// Opens protocol adapters for a job's base URL
///
/// The crawler depends on this seam rather than concrete adapters, so tests
/// can substitute synthetic directory trees.
#[async_trait]
pub trait DirectoryOpener: Send + Sync {
    async fn open(&self, url: &str) -> Result<Box<dyn RemoteDirectory>, ListingError>;
}

#[derive(Debug, Clone, Copy)]
enum AdapterKind {
    Http,
    Ftp,
}

/// Scheme-to-adapter registry
///
/// Dispatches on the URL scheme with tagged variants instead of inheritance.
pub struct SchemeRegistry {
    schemes: HashMap<&'static str, AdapterKind>,
    request_timeout: Duration,
}

impl SchemeRegistry {
    pub fn new(request_timeout: Duration) -> Self {
        let mut schemes = HashMap::new();
        schemes.insert("http", AdapterKind::Http);
        schemes.insert("https", AdapterKind::Http);
        schemes.insert("ftp", AdapterKind::Ftp);
        Self {
            schemes,
            request_timeout,
        }
    }
}

#[async_trait]
impl DirectoryOpener for SchemeRegistry {
    async fn open(&self, url: &str) -> Result<Box<dyn RemoteDirectory>, ListingError> {
        let parsed = Url::parse(url).map_err(|e| ListingError::Failed {
            path: url.to_string(),
            message: e.to_string(),
        })?;

        match self.schemes.get(parsed.scheme()) {
            Some(AdapterKind::Http) => Ok(Box::new(HttpDirectory::open(
                url,
                self.request_timeout,
            )?)),
            Some(AdapterKind::Ftp) => Ok(Box::new(
                FtpDirectory::open(url, self.request_timeout).await?,
            )),
            None => Err(ListingError::Failed {
                path: url.to_string(),
                message: format!("unsupported scheme '{}'", parsed.scheme()),
            }),
        }
    }
}
