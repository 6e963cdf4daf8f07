//! HTTP/HTTPS directory-index adapter
//!
//! Fetches a directory page, parses its anchors, classifies each anchor as a
//! subdirectory (trailing slash) or a file, and resolves file metadata with
//! lightweight HEAD requests. Anchors pointing outside the base URL, parent
//! links, sort-by-column links and anything carrying a query string are
//! discarded.

use crate::remote::{listing_fingerprint, File, Listing, ListingError, RemoteDirectory};
use async_trait::async_trait;
use percent_encoding::percent_decode_str;
use reqwest::header::{CONTENT_LENGTH, LAST_MODIFIED};
use reqwest::{redirect::Policy, Client};
use scraper::{Html, Selector};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use url::Url;

/// Retry budget for one page fetch or one metadata lookup
const MAX_RETRIES: u32 = 2;

/// Anchor-count threshold past which metadata lookups go concurrent
const PARALLEL_LOOKUP_THRESHOLD: usize = 150;

/// Concurrent metadata lookups for large directories
const PARALLEL_LOOKUPS: usize = 10;

/// Directory-listing client for `http` and `https` URLs
pub struct HttpDirectory {
    client: Client,
    /// Job base URL, normalized to end with a slash
    base_url: Url,
}

impl HttpDirectory {
    pub fn open(url: &str, timeout: Duration) -> Result<Self, ListingError> {
        let mut base_url = Url::parse(url).map_err(|e| ListingError::Failed {
            path: url.to_string(),
            message: e.to_string(),
        })?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        // Open directories frequently sit behind self-signed certificates;
        // only metadata is collected, so certificate validity is not a concern.
        let client = Client::builder()
            .user_agent(concat!("dirscout/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .connect_timeout(timeout)
            .redirect(Policy::limited(1))
            .danger_accept_invalid_certs(true)
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(|e| ListingError::Failed {
                path: url.to_string(),
                message: e.to_string(),
            })?;

        Ok(Self { client, base_url })
    }

    /// Fetches the directory page body with bounded retries
    async fn fetch_page(&self, page_url: &Url, path: &str) -> Result<String, ListingError> {
        for attempt in 1..=MAX_RETRIES {
            match self.client.get(page_url.clone()).send().await {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        return Err(ListingError::Failed {
                            path: path.to_string(),
                            message: format!("HTTP {}", status),
                        });
                    }
                    match response.text().await {
                        Ok(body) => return Ok(body),
                        Err(e) => {
                            tracing::debug!("body read failed for {} (attempt {}): {}", page_url, attempt, e);
                        }
                    }
                }
                Err(e) => {
                    tracing::debug!("GET {} failed (attempt {}): {}", page_url, attempt, e);
                }
            }
        }

        Err(ListingError::Timeout {
            path: path.to_string(),
        })
    }

    /// Resolves size and mtime for one file URL via a HEAD request
    ///
    /// Returns None when all retries are exhausted; the single entry is
    /// abandoned without failing the path.
    async fn request_file(client: &Client, base_url: &Url, file_url: Url) -> Option<File> {
        for attempt in 1..=MAX_RETRIES {
            match client.head(file_url.clone()).send().await {
                Ok(response) => {
                    let size = response
                        .headers()
                        .get(CONTENT_LENGTH)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(-1);
                    let mtime = response
                        .headers()
                        .get(LAST_MODIFIED)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| chrono::DateTime::parse_from_rfc2822(v).ok())
                        .map(|d| d.timestamp())
                        .unwrap_or(0);

                    let (path, name) = split_relative(base_url, &file_url);
                    return Some(File {
                        name,
                        path,
                        size,
                        mtime,
                        is_dir: false,
                    });
                }
                Err(e) => {
                    tracing::debug!("HEAD {} failed (attempt {}): {}", file_url, attempt, e);
                }
            }
        }

        tracing::debug!("abandoning entry {} after {} attempts", file_url, MAX_RETRIES);
        None
    }

    /// Resolves metadata for all file anchors of one page
    ///
    /// Small directories are looked up serially; past the threshold a bounded
    /// pool avoids opening hundreds of simultaneous connections.
    async fn request_files(&self, file_urls: Vec<Url>) -> Vec<File> {
        let mut files = Vec::with_capacity(file_urls.len());

        if file_urls.len() > PARALLEL_LOOKUP_THRESHOLD {
            let semaphore = Arc::new(Semaphore::new(PARALLEL_LOOKUPS));
            let mut lookups = JoinSet::new();
            for file_url in file_urls {
                let client = self.client.clone();
                let base_url = self.base_url.clone();
                let semaphore = Arc::clone(&semaphore);
                lookups.spawn(async move {
                    let _permit = semaphore.acquire_owned().await.ok()?;
                    Self::request_file(&client, &base_url, file_url).await
                });
            }
            while let Some(joined) = lookups.join_next().await {
                if let Ok(Some(file)) = joined {
                    files.push(file);
                }
            }
        } else {
            for file_url in file_urls {
                if let Some(file) = Self::request_file(&self.client, &self.base_url, file_url).await
                {
                    files.push(file);
                }
            }
        }

        files
    }

    /// Whether an anchor should be discarded instead of traversed
    fn should_ignore(&self, page_url: &Url, href: &str) -> bool {
        if href.starts_with('#') {
            return true;
        }

        // No query strings: dynamic pages are not listing entries, and this
        // also covers the sort-by-column links emitted by common index
        // generators (Apache, nginx autoindex, lighttpd)
        if href.contains('?') {
            return true;
        }

        let full = match page_url.join(href) {
            Ok(u) => u,
            Err(_) => return true,
        };

        // External links
        if !full.as_str().starts_with(self.base_url.as_str()) {
            return true;
        }

        // The conventional parent-directory link
        if let Ok(parent) = page_url.join("../") {
            if full == parent {
                return true;
            }
        }

        false
    }
}

#[async_trait]
impl RemoteDirectory for HttpDirectory {
    async fn list_dir(&mut self, path: &str) -> Result<Listing, ListingError> {
        let page_url = self.base_url.join(path).map_err(|e| ListingError::Parse {
            path: path.to_string(),
            message: e.to_string(),
        })?;

        let body = self.fetch_page(&page_url, path).await?;
        let anchors = parse_anchors(&body);

        let logical_path = path.trim_end_matches('/').to_string();
        let mut files = Vec::new();
        let mut file_urls = Vec::new();

        for href in anchors {
            if self.should_ignore(&page_url, &href) {
                continue;
            }

            let full = match page_url.join(&href) {
                Ok(u) => u,
                Err(e) => {
                    tracing::debug!("unresolvable href '{}': {}", href, e);
                    continue;
                }
            };

            if href.ends_with('/') {
                if let Some(name) = last_segment(&full) {
                    files.push(File {
                        name,
                        path: logical_path.clone(),
                        size: 0,
                        mtime: 0,
                        is_dir: true,
                    });
                }
            } else {
                file_urls.push(full);
            }
        }

        files.extend(self.request_files(file_urls).await);

        let fingerprint = listing_fingerprint(&files);
        Ok((fingerprint, files))
    }

    async fn close(&mut self) {
        tracing::debug!("closing HTTP adapter for {}", self.base_url);
    }
}

/// Extracts all anchor hrefs from a directory page
///
/// Sync helper: `scraper::Html` is not `Send`, so the document must not live
/// across an await point.
fn parse_anchors(body: &str) -> Vec<String> {
    let selector = Selector::parse("a[href]").expect("static selector");
    let document = Html::parse_document(body);
    document
        .select(&selector)
        .filter_map(|element| element.value().attr("href"))
        .map(|href| href.to_string())
        .collect()
}

/// Splits a file URL into its logical parent path and decoded name,
/// relative to the job's base URL
fn split_relative(base_url: &Url, file_url: &Url) -> (String, String) {
    let relative = file_url
        .path()
        .strip_prefix(base_url.path())
        .unwrap_or(file_url.path())
        .trim_matches('/');

    let (path, name) = match relative.rfind('/') {
        Some(idx) => (&relative[..idx], &relative[idx + 1..]),
        None => ("", relative),
    };

    (decode(path), decode(name))
}

/// Decoded name of the last path segment of a URL
fn last_segment(url: &Url) -> Option<String> {
    url.path_segments()?
        .filter(|s| !s.is_empty())
        .last()
        .map(decode)
}

fn decode(encoded: &str) -> String {
    percent_decode_str(encoded).decode_utf8_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const INDEX_PAGE: &str = r#"<html><body><h1>Index of /pub</h1>
        <a href="../">Parent Directory</a>
        <a href="subdir/">subdir/</a>
        <a href="report.pdf">report.pdf</a>
        <a href="?C=N&O=D">Name</a>
        <a href="page.php?id=3">dynamic</a>
        <a href="https://elsewhere.example/file.bin">mirror</a>
        </body></html>"#;

    async fn mount_index(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/pub/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(INDEX_PAGE)
                    .insert_header("content-type", "text/html"),
            )
            .mount(server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/pub/report.pdf"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-length", "2048")
                    .insert_header("last-modified", "Wed, 21 Oct 2015 07:28:00 GMT"),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_list_dir_classifies_entries() {
        let server = MockServer::start().await;
        mount_index(&server).await;

        let mut dir =
            HttpDirectory::open(&format!("{}/pub/", server.uri()), Duration::from_secs(5))
                .unwrap();
        let (_, files) = dir.list_dir("").await.unwrap();

        // Parent link, sort link, query-string link and external link are
        // all discarded; one subdirectory and one file remain.
        assert_eq!(files.len(), 2);

        let subdir = files.iter().find(|f| f.is_dir).unwrap();
        assert_eq!(subdir.name, "subdir");
        assert_eq!(subdir.path, "");

        let file = files.iter().find(|f| !f.is_dir).unwrap();
        assert_eq!(file.name, "report.pdf");
        assert_eq!(file.path, "");
        assert_eq!(file.size, 2048);
        assert_eq!(file.mtime, 1445412480);
    }

    #[tokio::test]
    async fn test_identical_content_same_fingerprint() {
        let server = MockServer::start().await;
        mount_index(&server).await;

        let mut dir =
            HttpDirectory::open(&format!("{}/pub/", server.uri()), Duration::from_secs(5))
                .unwrap();
        let (first, _) = dir.list_dir("").await.unwrap();
        let (second, _) = dir.list_dir("").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_missing_page_is_failed_not_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let mut dir =
            HttpDirectory::open(&format!("{}/gone/", server.uri()), Duration::from_secs(5))
                .unwrap();
        assert!(matches!(
            dir.list_dir("").await,
            Err(ListingError::Failed { .. })
        ));
    }

    #[tokio::test]
    async fn test_unreachable_host_times_out() {
        // Nothing listens on this port.
        let mut dir = HttpDirectory::open(
            "http://127.0.0.1:1/listing/",
            Duration::from_millis(200),
        )
        .unwrap();
        assert!(matches!(
            dir.list_dir("").await,
            Err(ListingError::Timeout { .. })
        ));
    }

    #[test]
    fn test_split_relative_decodes_segments() {
        let base = Url::parse("http://host/base/").unwrap();
        let file = Url::parse("http://host/base/sub%20dir/My%20File.txt").unwrap();
        let (path, name) = split_relative(&base, &file);
        assert_eq!(path, "sub dir");
        assert_eq!(name, "My File.txt");
    }
}
