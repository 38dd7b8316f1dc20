//! Streaming JSON Lines sink for the output log

use crate::error::{Error, Result};
use crate::types::Record;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Append-only JSON Lines writer
///
/// Every [`append`](JsonlSink::append) writes one line and syncs it to disk before
/// returning, so an interrupted run loses at most the record being written.
#[derive(Debug)]
pub struct JsonlSink {
    path: PathBuf,
    file: Option<File>,
    written: u64,
}

impl JsonlSink {
    /// Create (or truncate) the log at `path`, creating missing parent directories
    pub async fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .await?;

        tracing::debug!(path = %path.display(), "opened output log");

        Ok(Self {
            path,
            file: Some(file),
            written: 0,
        })
    }

    /// Location of the log
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records appended so far
    pub fn records_written(&self) -> u64 {
        self.written
    }

    /// True once [`close`](JsonlSink::close) has run
    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    /// Serialize `record` as one line and make it durable
    ///
    /// # Errors
    ///
    /// Serialization or I/O failures, or an append after `close`.
    pub async fn append(&mut self, record: &Record) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| Error::Io(std::io::Error::other("output log is already closed")))?;

        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        file.write_all(&line).await?;
        file.flush().await?;
        file.sync_data().await?;

        self.written += 1;
        Ok(())
    }

    /// Flush and release the file; later calls are no-ops
    pub async fn close(&mut self) -> Result<()> {
        let Some(mut file) = self.file.take() else {
            return Ok(());
        };
        file.flush().await?;
        file.sync_all().await?;
        tracing::debug!(
            path = %self.path.display(),
            records = self.written,
            "closed output log"
        );
        Ok(())
    }
}
