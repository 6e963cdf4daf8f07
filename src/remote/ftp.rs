//! Anonymous FTP directory adapter
//!
//! One control connection per adapter instance. The blocking `suppaftp`
//! stream is driven through `spawn_blocking`; the stream is moved into the
//! blocking closure and handed back with the outcome.
//!
//! Servers enforcing a connection-count limit (421/530) are reported as
//! [`ListingError::ConnectionLimit`] so the caller can abandon the
//! connection and requeue the path instead of retrying in place. Generic
//! timeouts are retried on the same connection up to a bound, after which
//! the connection is recycled.

use crate::remote::{listing_fingerprint, File, Listing, ListingError, RemoteDirectory};
use async_trait::async_trait;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::{Duration, UNIX_EPOCH};
use suppaftp::list::File as ListEntry;
use suppaftp::{FtpError, FtpStream, Status};
use url::Url;

/// Connect and listing retry budget
const MAX_ATTEMPTS: u32 = 3;

/// Pause between reconnection attempts
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Directory-listing client for `ftp` URLs
pub struct FtpDirectory {
    /// `host:port` of the remote server
    host: String,
    /// Live control connection; None once dropped because of a
    /// connection-count limit or a recycled timeout
    stream: Option<FtpStream>,
    timeout: Duration,
}

impl FtpDirectory {
    pub async fn open(url: &str, timeout: Duration) -> Result<Self, ListingError> {
        let parsed = Url::parse(url).map_err(|e| ListingError::Failed {
            path: url.to_string(),
            message: e.to_string(),
        })?;
        let host = parsed
            .host_str()
            .ok_or_else(|| ListingError::Failed {
                path: url.to_string(),
                message: "URL has no host".to_string(),
            })?
            .to_string();
        let host = format!("{}:{}", host, parsed.port().unwrap_or(21));

        let mut directory = Self {
            host,
            stream: None,
            timeout,
        };
        match directory.reconnect().await {
            Ok(()) => Ok(directory),
            // Refused for capacity: hand the adapter back unconnected so the
            // first list_dir reports the limit and the path gets requeued.
            Err(ListingError::ConnectionLimit) => Ok(directory),
            Err(e) => Err(e),
        }
    }

    /// Re-establishes the control connection, retrying transient failures
    ///
    /// A connection-limit reply (421/530) stops the attempts immediately and
    /// is reported as `ConnectionLimit`; exhausted retries against a host
    /// that simply cannot be reached report a descriptive `Failed`.
    async fn reconnect(&mut self) -> Result<(), ListingError> {
        let mut last_error = None;
        for attempt in 1..=MAX_ATTEMPTS {
            match Self::connect(self.host.clone(), self.timeout).await {
                Ok(stream) => {
                    self.stream = Some(stream);
                    return Ok(());
                }
                Err(FtpError::UnexpectedResponse(response))
                    if is_connection_limit(response.status) =>
                {
                    tracing::debug!("{}: connection refused by policy ({:?})", self.host, response.status);
                    return Err(ListingError::ConnectionLimit);
                }
                Err(e) => {
                    tracing::debug!("{}: connect attempt {} failed: {}", self.host, attempt, e);
                    last_error = Some(e);
                    if attempt < MAX_ATTEMPTS {
                        tokio::time::sleep(RECONNECT_DELAY).await;
                    }
                }
            }
        }

        Err(ListingError::Failed {
            path: String::new(),
            message: format!(
                "could not connect to {}: {}",
                self.host,
                last_error.map(|e| e.to_string()).unwrap_or_default()
            ),
        })
    }

    async fn connect(host: String, timeout: Duration) -> Result<FtpStream, FtpError> {
        tokio::task::spawn_blocking(move || {
            let addr: SocketAddr = host
                .to_socket_addrs()
                .map_err(FtpError::ConnectionError)?
                .next()
                .ok_or_else(|| {
                    FtpError::ConnectionError(io::Error::new(
                        io::ErrorKind::NotFound,
                        "host did not resolve",
                    ))
                })?;

            let mut stream = FtpStream::connect_timeout(addr, timeout)?;
            stream
                .get_ref()
                .set_read_timeout(Some(timeout))
                .map_err(FtpError::ConnectionError)?;
            stream.login("anonymous", "dirscout")?;
            Ok(stream)
        })
        .await
        .map_err(|e| FtpError::ConnectionError(io::Error::new(io::ErrorKind::Other, e)))?
    }

    /// Lists one directory on the blocking stream, retrying timeouts in place
    fn list_blocking(stream: &mut FtpStream, path: &str) -> Result<Vec<File>, ListingError> {
        let listing_path = if path.is_empty() { None } else { Some(path) };

        for attempt in 1..=MAX_ATTEMPTS {
            match stream.list(listing_path) {
                Ok(lines) => {
                    let mut files = Vec::with_capacity(lines.len());
                    for line in lines {
                        match ListEntry::try_from(line.as_str()) {
                            Ok(entry) => files.push(File {
                                name: entry.name().to_string(),
                                path: path.to_string(),
                                size: if entry.is_directory() {
                                    -1
                                } else {
                                    entry.size() as i64
                                },
                                mtime: entry
                                    .modified()
                                    .duration_since(UNIX_EPOCH)
                                    .map(|d| d.as_secs() as i64)
                                    .unwrap_or(0),
                                is_dir: entry.is_directory(),
                            }),
                            Err(e) => {
                                tracing::debug!("unparseable listing line '{}': {}", line, e);
                            }
                        }
                    }
                    return Ok(files);
                }
                Err(FtpError::UnexpectedResponse(response))
                    if is_connection_limit(response.status) =>
                {
                    return Err(ListingError::ConnectionLimit);
                }
                Err(FtpError::ConnectionError(e))
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
                    ) =>
                {
                    tracing::debug!("LIST '{}' timed out (attempt {})", path, attempt);
                }
                Err(e) => {
                    return Err(ListingError::Failed {
                        path: path.to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        Err(ListingError::Timeout {
            path: path.to_string(),
        })
    }
}

#[async_trait]
impl RemoteDirectory for FtpDirectory {
    async fn list_dir(&mut self, path: &str) -> Result<Listing, ListingError> {
        // A missing connection means the server dropped us for opening too
        // many; the caller must requeue the path onto another worker.
        let mut stream = self.stream.take().ok_or(ListingError::ConnectionLimit)?;

        let owned_path = path.trim_end_matches('/').to_string();
        let (stream, outcome) = tokio::task::spawn_blocking(move || {
            let outcome = Self::list_blocking(&mut stream, &owned_path);
            (stream, outcome)
        })
        .await
        .map_err(|e| ListingError::Failed {
            path: path.to_string(),
            message: e.to_string(),
        })?;

        match outcome {
            Ok(files) => {
                self.stream = Some(stream);
                let fingerprint = listing_fingerprint(&files);
                Ok((fingerprint, files))
            }
            Err(ListingError::ConnectionLimit) => {
                drop(stream);
                Err(ListingError::ConnectionLimit)
            }
            Err(timeout @ ListingError::Timeout { .. }) => {
                // The connection is suspect after repeated timeouts; recycle
                // it and let the caller retry the path. A failed reconnect
                // leaves the adapter unconnected, which retires this worker.
                drop(stream);
                let _ = self.reconnect().await;
                Err(timeout)
            }
            Err(other) => {
                self.stream = Some(stream);
                Err(other)
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let host = self.host.clone();
            let _ = tokio::task::spawn_blocking(move || {
                if let Err(e) = stream.quit() {
                    tracing::debug!("{}: QUIT failed: {}", host, e);
                }
            })
            .await;
        }
    }
}

fn is_connection_limit(status: Status) -> bool {
    matches!(status, Status::NotAvailable | Status::NotLoggedIn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_limit_statuses() {
        assert!(is_connection_limit(Status::NotAvailable));
        assert!(is_connection_limit(Status::NotLoggedIn));
        assert!(!is_connection_limit(Status::CommandOk));
    }

    #[tokio::test]
    async fn test_unconnected_adapter_reports_connection_limit() {
        let mut directory = FtpDirectory {
            host: "127.0.0.1:21".to_string(),
            stream: None,
            timeout: Duration::from_secs(1),
        };
        assert!(matches!(
            directory.list_dir("pub/").await,
            Err(ListingError::ConnectionLimit)
        ));
    }

    #[tokio::test]
    async fn test_unreachable_host_fails_open_with_connect_error() {
        // Nothing listens on this port; exhausted connect retries must
        // surface as a descriptive failure, not as a connection limit.
        let outcome = FtpDirectory::open("ftp://127.0.0.1:1/", Duration::from_millis(200)).await;
        let err = match outcome {
            Ok(_) => panic!("expected the open to fail"),
            Err(e) => e,
        };
        assert!(matches!(err, ListingError::Failed { .. }));
        assert!(err.to_string().contains("could not connect"));
    }

    #[test]
    fn test_list_entry_parsing() {
        // POSIX `ls -l` format as produced by most FTP daemons.
        let entry = ListEntry::try_from("drwxr-xr-x 2 ftp ftp 4096 Jan 5 2024 incoming").unwrap();
        assert!(entry.is_directory());
        assert_eq!(entry.name(), "incoming");
    }
}
