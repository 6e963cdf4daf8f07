//! NDJSON output sink
//!
//! A dedicated writer task serializes discovered files to the job's buffer
//! file, one JSON object per line, and reports the final record count when
//! every producer has hung up.

use crate::remote::File;
use std::io;
use std::path::PathBuf;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Spawns the writer task for one job
///
/// Returns the sender side (cloned into every worker) and the task handle,
/// which resolves to the number of records written once all senders drop.
pub fn spawn_writer(
    out_file: PathBuf,
    capacity: usize,
) -> (mpsc::Sender<File>, JoinHandle<io::Result<u64>>) {
    let (tx, mut rx) = mpsc::channel::<File>(capacity);

    let handle = tokio::spawn(async move {
        let file = tokio::fs::File::create(&out_file).await?;
        let mut writer = BufWriter::new(file);
        let mut count = 0u64;

        while let Some(record) = rx.recv().await {
            let line = serde_json::to_string(&record)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            count += 1;
        }

        writer.flush().await?;
        tracing::debug!("sink finalized: {} records", count);
        Ok(count)
    });

    (tx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::File;

    fn record(name: &str) -> File {
        File {
            name: name.to_string(),
            path: "pub".to_string(),
            size: 7,
            mtime: 99,
            is_dir: false,
        }
    }

    #[tokio::test]
    async fn test_writer_counts_and_formats_lines() {
        let dir = tempfile::tempdir().unwrap();
        let out_file = dir.path().join("out.ndjson");

        let (tx, handle) = spawn_writer(out_file.clone(), 16);
        tx.send(record("a.bin")).await.unwrap();
        tx.send(record("b.bin")).await.unwrap();
        drop(tx);

        let count = handle.await.unwrap().unwrap();
        assert_eq!(count, 2);

        let content = std::fs::read_to_string(&out_file).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: File = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.name, "a.bin");
        assert_eq!(first.path, "pub");
    }

    #[tokio::test]
    async fn test_empty_job_writes_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let out_file = dir.path().join("empty.ndjson");

        let (tx, handle) = spawn_writer(out_file.clone(), 4);
        drop(tx);

        assert_eq!(handle.await.unwrap().unwrap(), 0);
        assert_eq!(std::fs::read_to_string(&out_file).unwrap(), "");
    }
}
