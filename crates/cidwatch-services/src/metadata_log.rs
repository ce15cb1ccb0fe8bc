//! Append-only `"<cid> <content type>"` record of every enriched CID.

use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

use cidwatch_core::Cid;

use crate::ledger::LedgerError;

pub struct MetadataLog {
    path: PathBuf,
    file: File,
}

impl MetadataLog {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| LedgerError::Io(path.clone(), e))?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns once the record has reached the file.
    pub async fn record(&mut self, cid: &Cid, content_type: &str) -> Result<(), LedgerError> {
        let line = format!("{cid} {content_type}\n");
        self.file
            .write_all(line.as_bytes())
            .await
            .map_err(|e| LedgerError::Io(self.path.clone(), e))?;
        self.file
            .flush()
            .await
            .map_err(|e| LedgerError::Io(self.path.clone(), e))
    }
}
