//! Follow-mode reader over the CID ledger.
//!
//! Starts at the end of the file as it exists when the tail is opened, so
//! only records appended afterwards are delivered. Survives both rotation
//! styles: a rename is detected by a change in file identity (the old
//! handle is drained first), a truncation by the file shrinking below the
//! read offset.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};

use crate::ledger::LedgerError;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

type FileId = (u64, u64);

pub struct LedgerTail {
    path: PathBuf,
    reader: BufReader<File>,
    identity: Option<FileId>,
    offset: u64,
    partial: Vec<u8>,
    poll_interval: Duration,
}

impl LedgerTail {
    /// Open at the current end of `path`, waiting for it to appear if it
    /// does not exist yet.
    pub async fn from_end(
        path: impl Into<PathBuf>,
        poll_interval: Duration,
    ) -> Result<Self, LedgerError> {
        let path = path.into();
        let mut file = wait_for_file(&path, poll_interval).await?;
        let meta = file
            .metadata()
            .await
            .map_err(|e| LedgerError::Io(path.clone(), e))?;
        let offset = file
            .seek(std::io::SeekFrom::End(0))
            .await
            .map_err(|e| LedgerError::Io(path.clone(), e))?;

        tracing::debug!(path = %path.display(), offset, "ledger tail positioned at end");

        Ok(Self {
            path,
            reader: BufReader::new(file),
            identity: file_id(&meta),
            offset,
            partial: Vec::new(),
            poll_interval,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Next complete line, without its terminator. Waits for the writer
    /// when the file is exhausted.
    pub async fn next_line(&mut self) -> Result<String, LedgerError> {
        loop {
            let n = self
                .reader
                .read_until(b'\n', &mut self.partial)
                .await
                .map_err(|e| LedgerError::Io(self.path.clone(), e))?;
            self.offset += n as u64;

            if self.partial.last() == Some(&b'\n') {
                return Ok(self.take_line());
            }
            if n == 0 {
                self.at_eof().await?;
            }
        }
    }

    fn take_line(&mut self) -> String {
        let mut bytes = std::mem::take(&mut self.partial);
        while matches!(bytes.last(), Some(b'\n' | b'\r')) {
            bytes.pop();
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Nothing left on the current handle. Decide between rotation,
    /// truncation, and plain waiting.
    async fn at_eof(&mut self) -> Result<(), LedgerError> {
        let meta = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta,
            // Renamed away and not yet recreated.
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tokio::time::sleep(self.poll_interval).await;
                return Ok(());
            }
            Err(e) => return Err(LedgerError::Io(self.path.clone(), e)),
        };

        if file_id(&meta) != self.identity {
            // The writer may have appended to the old file after our last
            // read and before the rename.
            let old_len = self
                .reader
                .get_ref()
                .metadata()
                .await
                .map_err(|e| LedgerError::Io(self.path.clone(), e))?
                .len();
            if old_len > self.offset {
                return Ok(());
            }
            tracing::info!(path = %self.path.display(), "ledger rotated, following new file");
            self.reopen().await
        } else if meta.len() < self.offset {
            tracing::warn!(
                path = %self.path.display(),
                offset = self.offset,
                len = meta.len(),
                "ledger truncated, restarting from beginning"
            );
            self.reopen().await
        } else {
            tokio::time::sleep(self.poll_interval).await;
            Ok(())
        }
    }

    async fn reopen(&mut self) -> Result<(), LedgerError> {
        let file = File::open(&self.path)
            .await
            .map_err(|e| LedgerError::Io(self.path.clone(), e))?;
        let meta = file
            .metadata()
            .await
            .map_err(|e| LedgerError::Io(self.path.clone(), e))?;
        self.identity = file_id(&meta);
        self.reader = BufReader::new(file);
        self.offset = 0;
        self.partial.clear();
        Ok(())
    }
}

async fn wait_for_file(path: &Path, poll_interval: Duration) -> Result<File, LedgerError> {
    let mut logged = false;
    loop {
        match File::open(path).await {
            Ok(file) => return Ok(file),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                if !logged {
                    tracing::info!(path = %path.display(), "waiting for ledger file");
                    logged = true;
                }
                tokio::time::sleep(poll_interval).await;
            }
            Err(e) => return Err(LedgerError::Io(path.to_path_buf(), e)),
        }
    }
}

#[cfg(unix)]
fn file_id(meta: &std::fs::Metadata) -> Option<FileId> {
    use std::os::unix::fs::MetadataExt;
    Some((meta.dev(), meta.ino()))
}

#[cfg(not(unix))]
fn file_id(_meta: &std::fs::Metadata) -> Option<FileId> {
    None
}
